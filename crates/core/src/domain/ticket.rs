use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::operator::OperatorId;
use crate::domain::tenant::TenantId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(pub i64);

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Closed,
    Spam,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Spam => "spam",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "spam" => Some(Self::Spam),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub tenant_id: TenantId,
    pub slug: String,
    pub subject: String,
    pub email_from: Option<String>,
    pub email_from_name: Option<String>,
    pub status: TicketStatus,
    pub assigned_to: Option<OperatorId>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Sender label shown in chat summaries: display name, then address, then a placeholder.
    pub fn sender_label(&self) -> &str {
        self.email_from_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.email_from.as_deref())
            .unwrap_or("unknown sender")
    }

    /// Bulk mutations only ever apply to tickets that are still open.
    pub fn ensure_mutable(&self, next: TicketStatus) -> Result<(), DomainError> {
        if self.status == TicketStatus::Open {
            Ok(())
        } else {
            Err(DomainError::InvalidTicketTransition { from: self.status, to: next })
        }
    }
}

/// Scope filters intersected to produce a ticket match set.
///
/// `ids = Some(vec![])` is an explicit empty id-set and always yields no tickets; it never widens
/// to the unfiltered tenant scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketScope {
    pub tenant_id: TenantId,
    pub status: TicketStatus,
    pub created_before: Option<DateTime<Utc>>,
    pub ids: Option<Vec<TicketId>>,
    pub limit: Option<u32>,
}

impl TicketScope {
    pub fn open(tenant_id: TenantId) -> Self {
        Self { tenant_id, status: TicketStatus::Open, created_before: None, ids: None, limit: None }
    }

    pub fn created_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }

    pub fn with_ids(mut self, ids: Vec<TicketId>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_trivially_empty(&self) -> bool {
        matches!(&self.ids, Some(ids) if ids.is_empty()) || self.limit == Some(0)
    }

    /// Applies the scope to an in-memory ticket, ignoring ordering and limit.
    pub fn admits(&self, ticket: &Ticket) -> bool {
        if ticket.tenant_id != self.tenant_id || ticket.status != self.status {
            return false;
        }
        if let Some(cutoff) = self.created_before {
            if ticket.created_at >= cutoff {
                return false;
            }
        }
        match &self.ids {
            Some(ids) => ids.contains(&ticket.id),
            None => true,
        }
    }
}

/// Start of a look-back window ending at `now`, floored at the Unix epoch.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .filter(|start| *start > DateTime::<Utc>::UNIX_EPOCH)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStats {
    pub answered_by_operator: i64,
    pub open_tickets: i64,
    pub closed_since: i64,
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{window_start, Ticket, TicketId, TicketScope, TicketStatus};
    use crate::domain::tenant::TenantId;

    fn ticket(id: i64, tenant: &str, age_days: i64) -> Ticket {
        Ticket {
            id: TicketId(id),
            tenant_id: TenantId(tenant.to_owned()),
            slug: format!("t-{id}"),
            subject: "Billing question".to_owned(),
            email_from: Some("jane@example.com".to_owned()),
            email_from_name: None,
            status: TicketStatus::Open,
            assigned_to: None,
            created_at: Utc::now() - Duration::days(age_days),
            closed_at: None,
        }
    }

    #[test]
    fn scope_filters_by_tenant_age_and_id_set() {
        let cutoff = Utc::now() - Duration::days(10);
        let scope = TicketScope::open(TenantId("acme".to_owned()))
            .created_before(cutoff)
            .with_ids(vec![TicketId(1), TicketId(2)]);

        assert!(scope.admits(&ticket(1, "acme", 20)));
        assert!(!scope.admits(&ticket(2, "acme", 2)), "too recent");
        assert!(!scope.admits(&ticket(3, "acme", 20)), "not in id set");
        assert!(!scope.admits(&ticket(1, "globex", 20)), "other tenant");
    }

    #[test]
    fn empty_id_set_is_trivially_empty() {
        let scope = TicketScope::open(TenantId("acme".to_owned())).with_ids(Vec::new());
        assert!(scope.is_trivially_empty());
        assert!(!scope.admits(&ticket(1, "acme", 1)));
    }

    #[test]
    fn sender_label_prefers_display_name() {
        let mut t = ticket(1, "acme", 0);
        assert_eq!(t.sender_label(), "jane@example.com");
        t.email_from_name = Some("Jane Doe".to_owned());
        assert_eq!(t.sender_label(), "Jane Doe");
    }

    #[test]
    fn window_start_subtracts_and_floors_at_epoch() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single().expect("timestamp");

        assert_eq!(
            window_start(now, Duration::days(10)),
            Utc.with_ymd_and_hms(2026, 10, 9, 12, 0, 0).single().expect("timestamp")
        );
        assert_eq!(window_start(now, Duration::days(999_999_999)), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            window_start(now, Duration::hours(i64::from(u32::MAX))),
            DateTime::<Utc>::UNIX_EPOCH
        );
    }
}
