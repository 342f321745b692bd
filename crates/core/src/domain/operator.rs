use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorId(pub String);

impl std::fmt::Display for OperatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A support roster member as stored for a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub id: OperatorId,
    pub tenant_id: TenantId,
    pub display_name: Option<String>,
    pub email: String,
    pub external_ids: Vec<String>,
    pub active: bool,
}

impl RosterMember {
    pub fn has_external_id(&self, external_id: &str) -> bool {
        self.external_ids.iter().any(|candidate| candidate == external_id)
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }

    pub fn resolve(&self) -> ResolvedOperator {
        ResolvedOperator {
            operator_id: self.id.clone(),
            display_name: self.display_name.clone().unwrap_or_else(|| self.email.clone()),
        }
    }
}

/// The internal user a command executes on behalf of.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOperator {
    pub operator_id: OperatorId,
    pub display_name: String,
}
