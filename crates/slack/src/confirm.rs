//! Confirm and cancel buttons on bulk action prompts.
//!
//! Nothing about the pending action is stored server side. The signed descriptor in the button
//! value is verified, the clicking user is re-resolved, and the match set is recomputed before any
//! ticket changes.

use std::sync::Arc;

use async_trait::async_trait;

use deskhand_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use deskhand_core::descriptor::parse_action_id;
use deskhand_core::domain::tenant::{Tenant, TenantId};
use deskhand_core::errors::ApplicationError;
use deskhand_core::{
    ActionDescriptor, BulkActionKind, ConfirmationDecision, DescriptorCodec, DescriptorError,
};
use deskhand_db::repositories::RosterRepository;

use crate::blocks::{
    error_message, MessageTemplate, ACCESS_DENIED_TEXT, CANCELED_TEXT, PROCESSING_TEXT,
};
use crate::bulk::{BulkActionError, BulkActionExecutor};
use crate::events::{
    BlockActionEvent, EventContext, EventHandler, EventHandlerError, HandlerResult, SlackEnvelope,
    SlackEvent, SlackEventType,
};
use crate::identity::OperatorResolver;
use crate::responder::{ChatResponder, ThreadRef};

pub const EXPIRED_TEXT: &str = "This confirmation has expired. Please run the command again.";
pub const UNVERIFIED_TEXT: &str =
    "This confirmation could not be verified. Please run the command again.";
pub const WRONG_OPERATOR_TEXT: &str = "Only the person who requested this action can confirm it.";

/// Why a confirmation click was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rejection {
    Expired,
    Unverified,
    UnknownOperator,
    WrongOperator,
}

impl Rejection {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Unverified => "unverified",
            Self::UnknownOperator => "unknown_operator",
            Self::WrongOperator => "wrong_operator",
        }
    }

    fn text(&self) -> &'static str {
        match self {
            Self::Expired => EXPIRED_TEXT,
            Self::Unverified => UNVERIFIED_TEXT,
            Self::UnknownOperator => ACCESS_DENIED_TEXT,
            Self::WrongOperator => WRONG_OPERATOR_TEXT,
        }
    }
}

impl From<&DescriptorError> for Rejection {
    fn from(error: &DescriptorError) -> Self {
        match error {
            DescriptorError::Expired { .. } => Self::Expired,
            _ => Self::Unverified,
        }
    }
}

pub struct ConfirmationHandler {
    roster: Arc<dyn RosterRepository>,
    resolver: Arc<OperatorResolver>,
    codec: DescriptorCodec,
    executor: Arc<BulkActionExecutor>,
    responder: Arc<dyn ChatResponder>,
    audit: Arc<dyn AuditSink>,
}

impl ConfirmationHandler {
    pub fn new(
        roster: Arc<dyn RosterRepository>,
        resolver: Arc<OperatorResolver>,
        codec: DescriptorCodec,
        executor: Arc<BulkActionExecutor>,
        responder: Arc<dyn ChatResponder>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { roster, resolver, codec, executor, responder, audit }
    }

    /// Handles one button click. Failures end in an apology rather than an error.
    pub async fn handle_action(
        &self,
        event: &BlockActionEvent,
        ctx: &EventContext,
    ) -> HandlerResult {
        let Some((kind, decision)) = parse_action_id(&event.action_id) else {
            tracing::debug!(
                event_name = "confirm.action_ignored",
                correlation_id = %ctx.correlation_id,
                action_id = %event.action_id,
                "ignoring unrelated block action"
            );
            return HandlerResult::Ignored;
        };
        let thread = ThreadRef::new(
            event.channel_id.clone(),
            event.thread_ts.clone().unwrap_or_else(|| event.message_ts.clone()),
        );

        match self.process(event, kind, decision, &thread, ctx).await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(
                    event_name = "confirm.failed",
                    correlation_id = %ctx.correlation_id,
                    team_id = %event.team_id,
                    thread_id = %thread.thread_ts,
                    action = kind.as_str(),
                    error = %error,
                    "confirmation handling failed"
                );
                let interface = ApplicationError::from(error).into_interface(&ctx.correlation_id);
                let apology = error_message(interface.user_message(), interface.correlation_id());
                if let Err(post_error) = self.responder.post(&thread, &apology).await {
                    tracing::error!(
                        event_name = "confirm.apology_failed",
                        correlation_id = %ctx.correlation_id,
                        thread_id = %thread.thread_ts,
                        error = %post_error,
                        "failed to post apology"
                    );
                }
                HandlerResult::Processed
            }
        }
    }

    async fn process(
        &self,
        event: &BlockActionEvent,
        kind: BulkActionKind,
        decision: ConfirmationDecision,
        thread: &ThreadRef,
        ctx: &EventContext,
    ) -> Result<HandlerResult, BulkActionError> {
        let Some(tenant) = self.active_tenant(&event.team_id).await? else {
            return Ok(HandlerResult::Ignored);
        };

        if decision == ConfirmationDecision::Cancel {
            self.responder.post(thread, &MessageTemplate::text(CANCELED_TEXT)).await?;
            self.audit.emit(
                self.audit_event(&tenant.id, thread, ctx, kind, "cancelled", &event.user_id)
                    .with_metadata("action", kind.as_str()),
            );
            return Ok(HandlerResult::Processed);
        }

        let descriptor = match self.verify(event, kind, &tenant).await? {
            Ok(descriptor) => descriptor,
            Err(rejection) => {
                tracing::warn!(
                    event_name = "confirm.rejected",
                    correlation_id = %ctx.correlation_id,
                    tenant_id = %tenant.id,
                    thread_id = %thread.thread_ts,
                    reason = rejection.as_str(),
                    "refusing bulk action confirmation"
                );
                self.responder.post(thread, &MessageTemplate::text(rejection.text())).await?;
                let mut audit =
                    self.audit_event(&tenant.id, thread, ctx, kind, "rejected", &event.user_id);
                audit.outcome = AuditOutcome::Rejected;
                self.audit.emit(audit.with_metadata("reason", rejection.as_str()));
                return Ok(HandlerResult::Processed);
            }
        };

        self.audit.emit(
            self.audit_event(
                &tenant.id,
                thread,
                ctx,
                kind,
                "confirmed",
                &descriptor.origin.operator_id.0,
            )
            .with_metadata("search_term", descriptor.search_term.clone().unwrap_or_default()),
        );
        self.responder.post(thread, &MessageTemplate::text(PROCESSING_TEXT)).await?;
        self.executor.execute(&descriptor, &ctx.correlation_id).await?;
        Ok(HandlerResult::Processed)
    }

    /// Outer `Err` is an infrastructure failure; inner `Err` is a refused click.
    async fn verify(
        &self,
        event: &BlockActionEvent,
        kind: BulkActionKind,
        tenant: &Tenant,
    ) -> Result<Result<ActionDescriptor, Rejection>, BulkActionError> {
        let Some(value) = event.value.as_deref() else {
            return Ok(Err(Rejection::Unverified));
        };
        let descriptor = match self.codec.decode(kind, value) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                tracing::debug!(
                    event_name = "confirm.descriptor_invalid",
                    tenant_id = %tenant.id,
                    error = %error,
                    "descriptor verification failed"
                );
                return Ok(Err(Rejection::from(&error)));
            }
        };
        if descriptor.origin.tenant_id != tenant.id {
            return Ok(Err(Rejection::Unverified));
        }

        match self.resolver.resolve(&tenant.id, &event.user_id).await? {
            None => Ok(Err(Rejection::UnknownOperator)),
            Some(operator) if operator.operator_id != descriptor.origin.operator_id => {
                Ok(Err(Rejection::WrongOperator))
            }
            Some(_) => Ok(Ok(descriptor)),
        }
    }

    async fn active_tenant(&self, team_id: &str) -> Result<Option<Tenant>, BulkActionError> {
        Ok(self.roster.find_tenant_by_team(team_id).await?.filter(|tenant| tenant.active))
    }

    fn audit_event(
        &self,
        tenant_id: &TenantId,
        thread: &ThreadRef,
        ctx: &EventContext,
        kind: BulkActionKind,
        step: &str,
        actor: &str,
    ) -> AuditEvent {
        AuditEvent::new(
            Some(tenant_id.clone()),
            Some(thread.thread_ts.clone()),
            ctx.correlation_id.clone(),
            format!("bulk.{}.{step}", kind.as_str()),
            AuditCategory::Command,
            actor,
            AuditOutcome::Success,
        )
    }
}

#[async_trait]
impl EventHandler for ConfirmationHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Err(EventHandlerError::UnexpectedEvent(format!(
                "{:?}",
                envelope.event.event_type()
            )));
        };
        Ok(self.handle_action(event, ctx).await)
    }
}
