//! Bulk ticket operations driven from chat.
//!
//! Assign runs immediately. Close and reply only ever produce a confirmation prompt; the work
//! happens in [`BulkActionExecutor::execute`] once a signed descriptor comes back. Every ticket is
//! mutated in its own transaction so one failure never undoes the tickets before it.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;

use deskhand_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use deskhand_core::command::{AssignParams, CloseParams, ReplyParams};
use deskhand_core::domain::operator::{OperatorId, ResolvedOperator};
use deskhand_core::domain::tenant::{Tenant, TenantId};
use deskhand_core::domain::ticket::{window_start, Ticket, TicketId, TicketScope};
use deskhand_core::errors::ApplicationError;
use deskhand_core::{
    ActionDescriptor, ActionOrigin, BulkActionKind, DescriptorCodec, DescriptorError,
};
use deskhand_db::repositories::{RepositoryError, SearchGateway, TicketRepository};

use crate::blocks::{
    assignment_summary, close_prompt, execution_summary, reply_prompt, MessageTemplate, TicketCard,
};
use crate::responder::{ChatResponder, ResponderError, ThreadRef};

pub const ASSIGN_NOTE: &str = "Assigned via Slack mention";
pub const CLOSE_NOTE: &str = "Closed via Slack bulk action";
pub const NO_TICKETS_TO_CLOSE_TEXT: &str = "No matching tickets found to close.";
pub const NO_TICKETS_TO_REPLY_TEXT: &str = "No matching tickets found to reply to.";
pub const TOO_LARGE_TEXT: &str =
    "That request is too long to confirm in Slack. Please shorten the search term or message.";

#[derive(Debug, Error)]
pub enum BulkActionError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Responder(#[from] ResponderError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl From<BulkActionError> for ApplicationError {
    fn from(value: BulkActionError) -> Self {
        match value {
            BulkActionError::Repository(error) => error.into(),
            BulkActionError::Responder(error) => Self::Integration(error.to_string()),
            BulkActionError::Descriptor(error) => Self::Integration(error.to_string()),
        }
    }
}

/// Who asked, for which tenant, and where to answer.
#[derive(Clone, Debug)]
pub struct CommandContext {
    pub tenant: Tenant,
    pub operator: ResolvedOperator,
    pub thread: ThreadRef,
    pub correlation_id: String,
}

impl CommandContext {
    fn origin(&self) -> ActionOrigin {
        ActionOrigin {
            tenant_id: self.tenant.id.clone(),
            operator_id: self.operator.operator_id.clone(),
            channel_id: self.thread.channel_id.clone(),
            thread_ts: self.thread.thread_ts.clone(),
        }
    }
}

/// Outcome of a per-ticket mutation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub succeeded: Vec<Ticket>,
    pub failed: Vec<TicketId>,
}

#[derive(Clone, Copy)]
enum Mutation<'a> {
    Assign,
    Close,
    Reply(&'a str),
}

impl Mutation<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Close => "close",
            Self::Reply(_) => "reply",
        }
    }
}

pub struct BulkActionExecutor {
    tickets: Arc<dyn TicketRepository>,
    search: Arc<dyn SearchGateway>,
    responder: Arc<dyn ChatResponder>,
    codec: DescriptorCodec,
    app_base_url: String,
    audit: Arc<dyn AuditSink>,
}

impl BulkActionExecutor {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        search: Arc<dyn SearchGateway>,
        responder: Arc<dyn ChatResponder>,
        codec: DescriptorCodec,
        app_base_url: impl Into<String>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let app_base_url = app_base_url.into().trim_end_matches('/').to_owned();
        Self { tickets, search, responder, codec, app_base_url, audit }
    }

    pub fn ticket_url(&self, tenant_id: &TenantId, slug: &str) -> String {
        format!("{}/mailboxes/{tenant_id}/conversations?id={slug}", self.app_base_url)
    }

    pub async fn assign(
        &self,
        ctx: &CommandContext,
        params: &AssignParams,
    ) -> Result<ExecutionReport, BulkActionError> {
        let scope = TicketScope::open(ctx.tenant.id.clone()).limit(params.requested_count);
        let matches = self.resolve_matches(params.search_term.as_deref(), scope).await?;

        if matches.is_empty() {
            let text = match &params.search_term {
                Some(term) => format!("No open tickets found matching \"{term}\"."),
                None => "No open tickets found.".to_owned(),
            };
            self.responder.post(&ctx.thread, &MessageTemplate::text(text)).await?;
            return Ok(ExecutionReport::default());
        }

        let operator = &ctx.operator.operator_id;
        let report = self
            .apply(&ctx.tenant.id, operator, &matches, Mutation::Assign, &ctx.correlation_id)
            .await;

        let cards: Vec<TicketCard<'_>> = report
            .succeeded
            .iter()
            .map(|ticket| TicketCard {
                ticket,
                url: self.ticket_url(&ticket.tenant_id, &ticket.slug),
            })
            .collect();
        self.post_summary(&ctx.thread, &assignment_summary(&cards, &report.failed)).await;

        let event = self
            .audit_event(
                &ctx.tenant.id,
                &ctx.thread,
                &ctx.correlation_id,
                "bulk.assign.executed",
                operator,
            )
            .with_metadata("assigned", report.succeeded.len().to_string())
            .with_metadata("failed", report.failed.len().to_string());
        self.audit.emit(event);
        Ok(report)
    }

    pub async fn prompt_close(
        &self,
        ctx: &CommandContext,
        params: &CloseParams,
    ) -> Result<(), BulkActionError> {
        let scope = close_scope(ctx.tenant.id.clone(), params.days_threshold);
        let matches = self.resolve_matches(params.search_term.as_deref(), scope).await?;
        if matches.is_empty() {
            self.responder
                .post(&ctx.thread, &MessageTemplate::text(NO_TICKETS_TO_CLOSE_TEXT))
                .await?;
            return Ok(());
        }

        let descriptor =
            ActionDescriptor::close(ctx.origin(), params.search_term.clone(), params.days_threshold);
        let Some(value) = self.encode_or_report(&ctx.thread, &descriptor).await? else {
            return Ok(());
        };

        let prompt = close_prompt(
            matches.len(),
            params.search_term.as_deref(),
            params.days_threshold,
            value,
        );
        self.responder.post(&ctx.thread, &prompt).await?;
        self.emit_prompted(ctx, BulkActionKind::Close, matches.len());
        Ok(())
    }

    pub async fn prompt_reply(
        &self,
        ctx: &CommandContext,
        params: &ReplyParams,
    ) -> Result<(), BulkActionError> {
        let scope = TicketScope::open(ctx.tenant.id.clone());
        let matches = self.resolve_matches(params.search_term.as_deref(), scope).await?;
        if matches.is_empty() {
            self.responder
                .post(&ctx.thread, &MessageTemplate::text(NO_TICKETS_TO_REPLY_TEXT))
                .await?;
            return Ok(());
        }

        let descriptor =
            ActionDescriptor::reply(ctx.origin(), params.search_term.clone(), params.message.clone());
        let Some(value) = self.encode_or_report(&ctx.thread, &descriptor).await? else {
            return Ok(());
        };

        let prompt =
            reply_prompt(matches.len(), params.search_term.as_deref(), &params.message, value);
        self.responder.post(&ctx.thread, &prompt).await?;
        self.emit_prompted(ctx, BulkActionKind::Reply, matches.len());
        Ok(())
    }

    /// Runs a confirmed descriptor against a freshly computed match set.
    pub async fn execute(
        &self,
        descriptor: &ActionDescriptor,
        correlation_id: &str,
    ) -> Result<ExecutionReport, BulkActionError> {
        let origin = &descriptor.origin;
        let thread = ThreadRef::new(origin.channel_id.clone(), origin.thread_ts.clone());

        let (scope, empty_text) = match descriptor.kind {
            BulkActionKind::Close => (
                close_scope(origin.tenant_id.clone(), descriptor.days_threshold),
                NO_TICKETS_TO_CLOSE_TEXT,
            ),
            BulkActionKind::Reply => {
                (TicketScope::open(origin.tenant_id.clone()), NO_TICKETS_TO_REPLY_TEXT)
            }
        };
        let matches = self.resolve_matches(descriptor.search_term.as_deref(), scope).await?;
        if matches.is_empty() {
            self.responder.post(&thread, &MessageTemplate::text(empty_text)).await?;
            return Ok(ExecutionReport::default());
        }

        let mutation = match descriptor.kind {
            BulkActionKind::Close => Mutation::Close,
            BulkActionKind::Reply => {
                Mutation::Reply(descriptor.reply_message.as_deref().unwrap_or_default())
            }
        };
        let report = self
            .apply(&origin.tenant_id, &origin.operator_id, &matches, mutation, correlation_id)
            .await;

        self.post_summary(
            &thread,
            &execution_summary(descriptor.kind, report.succeeded.len(), &report.failed),
        )
        .await;

        let event_type = format!("bulk.{}.executed", descriptor.kind.as_str());
        let event = self
            .audit_event(&origin.tenant_id, &thread, correlation_id, event_type, &origin.operator_id)
            .with_metadata("succeeded", report.succeeded.len().to_string())
            .with_metadata("failed", report.failed.len().to_string());
        self.audit.emit(event);
        Ok(report)
    }

    /// Search narrows to an id-set first; zero hits short-circuits without widening the scope.
    async fn resolve_matches(
        &self,
        search_term: Option<&str>,
        scope: TicketScope,
    ) -> Result<Vec<Ticket>, BulkActionError> {
        let scope = match search_term {
            Some(term) => {
                let ids = self.search.search(&scope.tenant_id, term).await?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                scope.with_ids(ids)
            }
            None => scope,
        };
        Ok(self.tickets.find_matching(&scope).await?)
    }

    async fn apply(
        &self,
        tenant_id: &TenantId,
        operator: &OperatorId,
        tickets: &[Ticket],
        mutation: Mutation<'_>,
        correlation_id: &str,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for ticket in tickets {
            let outcome = match mutation {
                Mutation::Assign => {
                    self.tickets.assign(tenant_id, ticket.id, operator, ASSIGN_NOTE).await
                }
                Mutation::Close => {
                    self.tickets.close(tenant_id, ticket.id, operator, CLOSE_NOTE).await
                }
                Mutation::Reply(body) => {
                    self.tickets.reply(tenant_id, ticket.id, operator, body).await
                }
            };

            match outcome {
                Ok(updated) => report.succeeded.push(updated),
                Err(error) => {
                    tracing::warn!(
                        event_name = "bulk.ticket.failed",
                        correlation_id,
                        tenant_id = %tenant_id,
                        ticket_id = ticket.id.0,
                        action = mutation.label(),
                        error = %error,
                        "ticket mutation failed; continuing with remaining tickets"
                    );
                    report.failed.push(ticket.id);
                }
            }
        }

        tracing::info!(
            event_name = "bulk.batch.completed",
            correlation_id,
            tenant_id = %tenant_id,
            action = mutation.label(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "bulk ticket pass finished"
        );
        report
    }

    async fn encode_or_report(
        &self,
        thread: &ThreadRef,
        descriptor: &ActionDescriptor,
    ) -> Result<Option<String>, BulkActionError> {
        match self.codec.encode(descriptor) {
            Ok(value) => Ok(Some(value)),
            Err(DescriptorError::TooLarge { len }) => {
                tracing::warn!(
                    event_name = "bulk.descriptor.too_large",
                    thread_id = %thread.thread_ts,
                    len,
                    "confirmation value exceeds slack limit"
                );
                self.responder.post(thread, &MessageTemplate::text(TOO_LARGE_TEXT)).await?;
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Mutations are already committed; a failed summary post is only logged.
    async fn post_summary(&self, thread: &ThreadRef, message: &MessageTemplate) {
        if let Err(error) = self.responder.post(thread, message).await {
            tracing::error!(
                event_name = "bulk.summary.post_failed",
                thread_id = %thread.thread_ts,
                error = %error,
                "failed to post bulk action summary"
            );
        }
    }

    fn emit_prompted(&self, ctx: &CommandContext, kind: BulkActionKind, matched: usize) {
        let event_type = format!("bulk.{}.prompted", kind.as_str());
        self.audit.emit(
            self.audit_event(
                &ctx.tenant.id,
                &ctx.thread,
                &ctx.correlation_id,
                event_type,
                &ctx.operator.operator_id,
            )
            .with_metadata("matched", matched.to_string()),
        );
    }

    fn audit_event(
        &self,
        tenant_id: &TenantId,
        thread: &ThreadRef,
        correlation_id: &str,
        event_type: impl Into<String>,
        operator: &OperatorId,
    ) -> AuditEvent {
        AuditEvent::new(
            Some(tenant_id.clone()),
            Some(thread.thread_ts.clone()),
            correlation_id,
            event_type,
            AuditCategory::Mutation,
            operator.0.clone(),
            AuditOutcome::Success,
        )
    }
}

fn close_scope(tenant_id: TenantId, days_threshold: Option<u32>) -> TicketScope {
    let scope = TicketScope::open(tenant_id);
    match days_threshold {
        Some(days) => {
            scope.created_before(window_start(Utc::now(), Duration::days(i64::from(days))))
        }
        None => scope,
    }
}
