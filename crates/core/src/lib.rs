pub mod audit;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod domain;
pub mod errors;

pub use command::{Command, CommandDefaults, CommandInterpreter, CommandRule, Intent};
pub use descriptor::{
    ActionDescriptor, ActionOrigin, BulkActionKind, ConfirmationDecision, DescriptorCodec,
    DescriptorError,
};
pub use domain::operator::{OperatorId, ResolvedOperator, RosterMember};
pub use domain::tenant::{Tenant, TenantId};
pub use domain::ticket::{Ticket, TicketId, TicketScope, TicketStats, TicketStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
