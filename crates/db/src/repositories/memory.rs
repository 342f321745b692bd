use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use deskhand_core::domain::operator::{OperatorId, RosterMember};
use deskhand_core::domain::tenant::{Tenant, TenantId};
use deskhand_core::domain::ticket::{Ticket, TicketId, TicketScope, TicketStats, TicketStatus};

use super::search::tokenize;
use super::{RepositoryError, RosterRepository, SearchGateway, TicketRepository};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedTicketEvent {
    pub ticket_id: TicketId,
    pub operator_id: OperatorId,
    pub change: String,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedMessage {
    pub ticket_id: TicketId,
    pub author: OperatorId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct TicketState {
    tickets: BTreeMap<TicketId, Ticket>,
    messages: Vec<RecordedMessage>,
    events: Vec<RecordedTicketEvent>,
    failing: HashSet<TicketId>,
    next_id: i64,
}

impl TicketState {
    fn mutable_ticket(
        &mut self,
        tenant_id: &TenantId,
        id: TicketId,
        next: TicketStatus,
    ) -> Result<&mut Ticket, RepositoryError> {
        if self.failing.contains(&id) {
            return Err(RepositoryError::Database(sqlx::Error::Protocol(format!(
                "injected failure for ticket {id}"
            ))));
        }
        let ticket = self
            .tickets
            .get_mut(&id)
            .filter(|ticket| &ticket.tenant_id == tenant_id)
            .ok_or(RepositoryError::TicketNotFound(id))?;
        ticket.ensure_mutable(next)?;
        Ok(ticket)
    }
}

/// Ticket store for tests; mutations for selected ids can be made to fail.
#[derive(Default)]
pub struct InMemoryTicketRepository {
    state: RwLock<TicketState>,
}

impl InMemoryTicketRepository {
    pub async fn fail_mutations_for(&self, id: TicketId) {
        self.state.write().await.failing.insert(id);
    }

    pub async fn ticket(&self, id: TicketId) -> Option<Ticket> {
        self.state.read().await.tickets.get(&id).cloned()
    }

    pub async fn events(&self) -> Vec<RecordedTicketEvent> {
        self.state.read().await.events.clone()
    }

    pub async fn messages(&self) -> Vec<RecordedMessage> {
        self.state.read().await.messages.clone()
    }
}

#[async_trait::async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn find_matching(&self, scope: &TicketScope) -> Result<Vec<Ticket>, RepositoryError> {
        if scope.is_trivially_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let mut matches: Vec<Ticket> =
            state.tickets.values().filter(|ticket| scope.admits(ticket)).cloned().collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = scope.limit {
            matches.truncate(limit as usize);
        }
        Ok(matches)
    }

    async fn assign(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        note: &str,
    ) -> Result<Ticket, RepositoryError> {
        let mut state = self.state.write().await;
        let ticket = state.mutable_ticket(tenant_id, id, TicketStatus::Open)?;
        ticket.assigned_to = Some(operator.clone());
        let updated = ticket.clone();

        state.events.push(RecordedTicketEvent {
            ticket_id: id,
            operator_id: operator.clone(),
            change: "assigned".to_owned(),
            detail: note.to_owned(),
        });
        Ok(updated)
    }

    async fn close(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        note: &str,
    ) -> Result<Ticket, RepositoryError> {
        let mut state = self.state.write().await;
        let ticket = state.mutable_ticket(tenant_id, id, TicketStatus::Closed)?;
        ticket.status = TicketStatus::Closed;
        ticket.closed_at = Some(Utc::now());
        let updated = ticket.clone();

        state.events.push(RecordedTicketEvent {
            ticket_id: id,
            operator_id: operator.clone(),
            change: "closed".to_owned(),
            detail: note.to_owned(),
        });
        Ok(updated)
    }

    async fn reply(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        body: &str,
    ) -> Result<Ticket, RepositoryError> {
        let mut state = self.state.write().await;
        let ticket = state.mutable_ticket(tenant_id, id, TicketStatus::Open)?.clone();

        state.messages.push(RecordedMessage {
            ticket_id: id,
            author: operator.clone(),
            body: body.to_owned(),
            created_at: Utc::now(),
        });
        state.events.push(RecordedTicketEvent {
            ticket_id: id,
            operator_id: operator.clone(),
            change: "replied".to_owned(),
            detail: body.to_owned(),
        });
        Ok(ticket)
    }

    async fn stats(
        &self,
        tenant_id: &TenantId,
        operator: &OperatorId,
        since: DateTime<Utc>,
    ) -> Result<TicketStats, RepositoryError> {
        let state = self.state.read().await;
        let in_tenant = |id: &TicketId| {
            state.tickets.get(id).map(|ticket| &ticket.tenant_id == tenant_id).unwrap_or(false)
        };

        let answered_by_operator = state
            .messages
            .iter()
            .filter(|message| {
                &message.author == operator && message.created_at > since && in_tenant(&message.ticket_id)
            })
            .count() as i64;
        let open_tickets = state
            .tickets
            .values()
            .filter(|ticket| &ticket.tenant_id == tenant_id && ticket.status == TicketStatus::Open)
            .count() as i64;
        let closed_since = state
            .tickets
            .values()
            .filter(|ticket| {
                &ticket.tenant_id == tenant_id
                    && ticket.status == TicketStatus::Closed
                    && ticket.closed_at.map(|at| at > since).unwrap_or(false)
            })
            .count() as i64;

        Ok(TicketStats { answered_by_operator, open_tickets, closed_since })
    }

    async fn create(&self, ticket: Ticket) -> Result<Ticket, RepositoryError> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let ticket = Ticket { id: TicketId(state.next_id), ..ticket };
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }
}

#[derive(Default)]
pub struct InMemoryRosterRepository {
    tenants: RwLock<Vec<Tenant>>,
    members: RwLock<Vec<RosterMember>>,
}

#[async_trait::async_trait]
impl RosterRepository for InMemoryRosterRepository {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        Ok(self.tenants.read().await.iter().find(|tenant| &tenant.id == id).cloned())
    }

    async fn find_tenant_by_team(&self, team_id: &str) -> Result<Option<Tenant>, RepositoryError> {
        Ok(self
            .tenants
            .read()
            .await
            .iter()
            .find(|tenant| tenant.chat_team_id.as_deref() == Some(team_id))
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<Option<RosterMember>, RepositoryError> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .find(|member| {
                &member.tenant_id == tenant_id && member.active && member.has_external_id(external_id)
            })
            .cloned())
    }

    async fn find_by_email(
        &self,
        tenant_id: &TenantId,
        email: &str,
    ) -> Result<Option<RosterMember>, RepositoryError> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .find(|member| &member.tenant_id == tenant_id && member.active && member.has_email(email))
            .cloned())
    }

    async fn find_member(
        &self,
        tenant_id: &TenantId,
        operator_id: &OperatorId,
    ) -> Result<Option<RosterMember>, RepositoryError> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .find(|member| &member.tenant_id == tenant_id && &member.id == operator_id)
            .cloned())
    }

    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        let mut tenants = self.tenants.write().await;
        tenants.retain(|existing| existing.id != tenant.id);
        tenants.push(tenant);
        Ok(())
    }

    async fn save_member(&self, member: RosterMember) -> Result<(), RepositoryError> {
        let mut members = self.members.write().await;
        members.retain(|existing| existing.id != member.id);
        members.push(member);
        Ok(())
    }
}

/// Plaintext token index with the same AND semantics as the blind index.
#[derive(Default)]
pub struct InMemorySearchIndex {
    entries: RwLock<Vec<(TenantId, TicketId, BTreeSet<String>)>>,
    unavailable: AtomicBool,
}

impl InMemorySearchIndex {
    pub async fn index_ticket(&self, tenant_id: &TenantId, ticket_id: TicketId, plaintext: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|(_, id, _)| *id != ticket_id);
        entries.push((tenant_id.clone(), ticket_id, tokenize(plaintext)));
    }

    /// Makes every subsequent search fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SearchGateway for InMemorySearchIndex {
    async fn search(
        &self,
        tenant_id: &TenantId,
        term: &str,
    ) -> Result<Vec<TicketId>, RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Search("search index unavailable".to_owned()));
        }

        let wanted = tokenize(term);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut found: Vec<TicketId> = entries
            .iter()
            .filter(|(tenant, _, tokens)| tenant == tenant_id && wanted.is_subset(tokens))
            .map(|(_, id, _)| *id)
            .collect();
        found.sort_by(|a, b| b.cmp(a));
        Ok(found)
    }
}
