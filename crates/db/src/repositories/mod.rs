use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use deskhand_core::domain::operator::{OperatorId, RosterMember};
use deskhand_core::domain::tenant::{Tenant, TenantId};
use deskhand_core::domain::ticket::{Ticket, TicketId, TicketScope, TicketStats};
use deskhand_core::errors::{ApplicationError, DomainError};

pub mod memory;
pub mod roster;
pub mod search;
pub mod ticket;

pub use memory::{InMemoryRosterRepository, InMemorySearchIndex, InMemoryTicketRepository};
pub use roster::SqlRosterRepository;
pub use search::SqlSearchIndex;
pub use ticket::SqlTicketRepository;

/// External identity provider recorded for chat-linked operator accounts.
pub const CHAT_PROVIDER: &str = "slack";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("ticket {0} was not found in this tenant")]
    TicketNotFound(TicketId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("search index failure: {0}")]
    Search(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Domain(error) => Self::Domain(error),
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Open tickets matching the scope, newest first.
    async fn find_matching(&self, scope: &TicketScope) -> Result<Vec<Ticket>, RepositoryError>;

    async fn assign(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        note: &str,
    ) -> Result<Ticket, RepositoryError>;

    async fn close(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        note: &str,
    ) -> Result<Ticket, RepositoryError>;

    async fn reply(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        body: &str,
    ) -> Result<Ticket, RepositoryError>;

    async fn stats(
        &self,
        tenant_id: &TenantId,
        operator: &OperatorId,
        since: DateTime<Utc>,
    ) -> Result<TicketStats, RepositoryError>;

    /// Inserts a ticket and returns it with its assigned id.
    async fn create(&self, ticket: Ticket) -> Result<Ticket, RepositoryError>;
}

#[async_trait]
pub trait RosterRepository: Send + Sync {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError>;

    async fn find_tenant_by_team(&self, team_id: &str) -> Result<Option<Tenant>, RepositoryError>;

    async fn find_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<Option<RosterMember>, RepositoryError>;

    async fn find_by_email(
        &self,
        tenant_id: &TenantId,
        email: &str,
    ) -> Result<Option<RosterMember>, RepositoryError>;

    async fn find_member(
        &self,
        tenant_id: &TenantId,
        operator_id: &OperatorId,
    ) -> Result<Option<RosterMember>, RepositoryError>;

    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError>;

    async fn save_member(&self, member: RosterMember) -> Result<(), RepositoryError>;
}

/// Keyword search over encrypted ticket content. Only identifiers ever leave the index.
#[async_trait]
pub trait SearchGateway: Send + Sync {
    async fn search(&self, tenant_id: &TenantId, term: &str)
        -> Result<Vec<TicketId>, RepositoryError>;
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
