use std::sync::Arc;

use deskhand_core::domain::operator::ResolvedOperator;
use deskhand_core::domain::tenant::TenantId;
use deskhand_db::repositories::RosterRepository;

use crate::bulk::BulkActionError;
use crate::responder::ChatProfileLookup;

/// Maps a chat user onto the tenant's support roster.
///
/// The linked external account wins; otherwise the chat profile email is matched against active
/// roster members. An unresolved user gets `Ok(None)`, never an error.
pub struct OperatorResolver {
    roster: Arc<dyn RosterRepository>,
    profiles: Arc<dyn ChatProfileLookup>,
}

impl OperatorResolver {
    pub fn new(roster: Arc<dyn RosterRepository>, profiles: Arc<dyn ChatProfileLookup>) -> Self {
        Self { roster, profiles }
    }

    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<Option<ResolvedOperator>, BulkActionError> {
        if let Some(member) = self.roster.find_by_external_id(tenant_id, external_id).await? {
            return Ok(Some(member.resolve()));
        }

        let Some(email) = self.profiles.email_for(external_id).await? else {
            tracing::debug!(
                event_name = "identity.profile_email_missing",
                tenant_id = %tenant_id,
                external_id,
                "chat profile has no email"
            );
            return Ok(None);
        };

        Ok(self.roster.find_by_email(tenant_id, &email).await?.map(|member| member.resolve()))
    }
}
