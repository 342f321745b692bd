//! Entry point for bot mentions.
//!
//! Identity is resolved before any command work, and every failure past that point ends in a
//! reply: errors are logged and replaced with a generic apology in the originating thread.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use deskhand_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use deskhand_core::command::{Command, CommandInterpreter, ExtractError};
use deskhand_core::errors::ApplicationError;
use deskhand_db::repositories::RosterRepository;

use crate::blocks::{
    error_message, help_message, MessageTemplate, ACCESS_DENIED_TEXT, MISSING_REPLY_MESSAGE_TEXT,
};
use crate::bulk::{BulkActionError, BulkActionExecutor, CommandContext};
use crate::events::{
    EventContext, EventHandler, EventHandlerError, HandlerResult, MentionEvent, SlackEnvelope,
    SlackEvent, SlackEventType,
};
use crate::identity::OperatorResolver;
use crate::responder::{ChatResponder, ThreadRef};
use crate::stats::StatsReporter;

static MENTION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@[A-Z0-9]+>").expect("static regex compile"));

/// Removes the first `<@U…>` bot reference and surrounding whitespace.
pub fn strip_mention(text: &str) -> String {
    MENTION_TOKEN.replacen(text, 1, "").trim().to_owned()
}

pub struct MentionDispatcher {
    roster: Arc<dyn RosterRepository>,
    resolver: Arc<OperatorResolver>,
    interpreter: CommandInterpreter,
    executor: Arc<BulkActionExecutor>,
    stats: StatsReporter,
    responder: Arc<dyn ChatResponder>,
    audit: Arc<dyn AuditSink>,
}

impl MentionDispatcher {
    pub fn new(
        roster: Arc<dyn RosterRepository>,
        resolver: Arc<OperatorResolver>,
        interpreter: CommandInterpreter,
        executor: Arc<BulkActionExecutor>,
        stats: StatsReporter,
        responder: Arc<dyn ChatResponder>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { roster, resolver, interpreter, executor, stats, responder, audit }
    }

    /// Handles one mention end to end. Never returns an error to the caller.
    pub async fn handle_mention(&self, event: &MentionEvent, ctx: &EventContext) -> HandlerResult {
        let thread = ThreadRef::new(event.channel_id.clone(), event.thread_ts.clone());

        match self.process(event, &thread, ctx).await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(
                    event_name = "mention.failed",
                    correlation_id = %ctx.correlation_id,
                    team_id = %event.team_id,
                    thread_id = %event.thread_ts,
                    error = %error,
                    "mention handling failed"
                );
                let interface = ApplicationError::from(error).into_interface(&ctx.correlation_id);
                let apology = error_message(interface.user_message(), interface.correlation_id());
                if let Err(post_error) = self.responder.post(&thread, &apology).await {
                    tracing::error!(
                        event_name = "mention.apology_failed",
                        correlation_id = %ctx.correlation_id,
                        thread_id = %event.thread_ts,
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
        event: &MentionEvent,
        thread: &ThreadRef,
        ctx: &EventContext,
    ) -> Result<HandlerResult, BulkActionError> {
        let tenant = match self.roster.find_tenant_by_team(&event.team_id).await? {
            Some(tenant) if tenant.active => tenant,
            _ => {
                tracing::info!(
                    event_name = "mention.tenant_unknown",
                    correlation_id = %ctx.correlation_id,
                    team_id = %event.team_id,
                    "ignoring mention from unknown or inactive workspace"
                );
                return Ok(HandlerResult::Ignored);
            }
        };

        let Some(operator) = self.resolver.resolve(&tenant.id, &event.user_id).await? else {
            self.responder.post(thread, &MessageTemplate::text(ACCESS_DENIED_TEXT)).await?;
            self.audit.emit(
                AuditEvent::new(
                    Some(tenant.id.clone()),
                    Some(thread.thread_ts.clone()),
                    ctx.correlation_id.clone(),
                    "mention.denied",
                    AuditCategory::Ingress,
                    event.user_id.clone(),
                    AuditOutcome::Rejected,
                ),
            );
            return Ok(HandlerResult::Processed);
        };

        let text = strip_mention(&event.text);
        let command = self.interpreter.interpret(&text);
        tracing::info!(
            event_name = "mention.command_interpreted",
            correlation_id = %ctx.correlation_id,
            tenant_id = %tenant.id,
            thread_id = %thread.thread_ts,
            intent = command.as_ref().map(|command| command.intent().as_str()).unwrap_or("reply"),
            "interpreted mention"
        );

        let command_ctx = CommandContext {
            tenant,
            operator,
            thread: thread.clone(),
            correlation_id: ctx.correlation_id.clone(),
        };

        match command {
            Err(ExtractError::MissingReplyMessage) => {
                self.responder.post(thread, &MessageTemplate::text(MISSING_REPLY_MESSAGE_TEXT)).await?;
            }
            Ok(Command::Help) => self.responder.post(thread, &help_message()).await?,
            Ok(Command::Assign(params)) => {
                self.executor.assign(&command_ctx, &params).await?;
            }
            Ok(Command::Stats(params)) => {
                self.stats.report(&command_ctx, &params).await?;
            }
            Ok(Command::Close(params)) => self.executor.prompt_close(&command_ctx, &params).await?,
            Ok(Command::Reply(params)) => self.executor.prompt_reply(&command_ctx, &params).await?,
        }

        Ok(HandlerResult::Processed)
    }
}

#[async_trait]
impl EventHandler for MentionDispatcher {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppMention(event) = &envelope.event else {
            return Err(EventHandlerError::UnexpectedEvent(format!(
                "{:?}",
                envelope.event.event_type()
            )));
        };
        Ok(self.handle_mention(event, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use deskhand_core::command::{CommandDefaults, CommandInterpreter};
    use deskhand_core::domain::operator::{OperatorId, RosterMember};
    use deskhand_core::domain::tenant::{Tenant, TenantId};
    use deskhand_db::repositories::{InMemoryRosterRepository, RosterRepository};

    use super::{strip_mention, MentionDispatcher};
    use crate::blocks::{Block, ACCESS_DENIED_TEXT, MISSING_REPLY_MESSAGE_TEXT};
    use crate::bulk::tests::Harness;
    use crate::bulk::NO_TICKETS_TO_CLOSE_TEXT;
    use crate::events::{EventContext, HandlerResult, MentionEvent};
    use crate::identity::OperatorResolver;
    use crate::responder::InMemoryResponder;
    use crate::stats::StatsReporter;

    async fn dispatcher(harness: &Harness, tenant_active: bool) -> MentionDispatcher {
        let roster = Arc::new(InMemoryRosterRepository::default());
        roster
            .save_tenant(Tenant {
                id: TenantId("acme".to_owned()),
                name: "Acme".to_owned(),
                chat_team_id: Some("T0ACME".to_owned()),
                active: tenant_active,
            })
            .await
            .expect("save tenant");
        roster
            .save_member(RosterMember {
                id: OperatorId("op-1".to_owned()),
                tenant_id: TenantId("acme".to_owned()),
                display_name: Some("Riley".to_owned()),
                email: "riley@acme.test".to_owned(),
                external_ids: vec!["U100".to_owned()],
                active: true,
            })
            .await
            .expect("save member");

        let resolver = Arc::new(OperatorResolver::new(roster.clone(), harness.responder.clone()));
        MentionDispatcher::new(
            roster,
            resolver,
            CommandInterpreter::new(CommandDefaults::default()),
            harness.executor.clone(),
            StatsReporter::new(harness.tickets.clone(), harness.responder.clone()),
            harness.responder.clone(),
            Arc::new(harness.audit.clone()),
        )
    }

    fn mention(user: &str, text: &str) -> MentionEvent {
        MentionEvent {
            team_id: "T0ACME".to_owned(),
            user_id: user.to_owned(),
            text: text.to_owned(),
            channel_id: "C1".to_owned(),
            thread_ts: "1730000000.0001".to_owned(),
        }
    }

    #[test]
    fn strips_only_the_first_mention_token() {
        assert_eq!(strip_mention("<@UBOT> give me <@U2> tickets"), "give me <@U2> tickets");
        assert_eq!(strip_mention("  help  "), "help");
    }

    #[tokio::test]
    async fn unknown_operator_is_denied_before_any_command_work() {
        let harness = Harness::new();
        harness.ticket("Billing", "billing", 1).await;
        let dispatcher = dispatcher(&harness, true).await;

        let result = dispatcher
            .handle_mention(&mention("U999", "<@UBOT> give me 2 tickets"), &EventContext::default())
            .await;

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(harness.responder.texts().await, vec![ACCESS_DENIED_TEXT.to_owned()]);
        assert!(harness.tickets.events().await.is_empty());
        assert_eq!(harness.audit.event_types(), vec!["mention.denied"]);
    }

    #[tokio::test]
    async fn inactive_tenant_is_ignored() {
        let harness = Harness::new();
        let dispatcher = dispatcher(&harness, false).await;

        let result = dispatcher
            .handle_mention(&mention("U100", "<@UBOT> help"), &EventContext::default())
            .await;

        assert_eq!(result, HandlerResult::Ignored);
        assert!(harness.responder.posts().await.is_empty());
    }

    #[tokio::test]
    async fn assign_mention_assigns_and_summarizes() {
        let harness = Harness::new();
        for age in 0..7 {
            harness.ticket(&format!("Billing {age}"), "billing question", age).await;
        }
        let dispatcher = dispatcher(&harness, true).await;

        dispatcher
            .handle_mention(
                &mention("U100", "<@UBOT> give me 3 tickets about billing"),
                &EventContext::default(),
            )
            .await;

        let posts = harness.responder.posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1.buttons().filter(|button| button.url.is_some()).count(), 3);
        assert_eq!(harness.tickets.events().await.len(), 3);
    }

    #[tokio::test]
    async fn assign_mention_caps_large_requests_at_five() {
        let harness = Harness::new();
        for age in 0..7 {
            harness.ticket(&format!("Billing {age}"), "billing question", age).await;
        }
        let dispatcher = dispatcher(&harness, true).await;

        dispatcher
            .handle_mention(
                &mention("U100", "<@UBOT> give me 10 tickets about billing"),
                &EventContext::default(),
            )
            .await;

        let posts = harness.responder.posts().await;
        assert_eq!(posts.len(), 1);
        assert!(posts[0].1.fallback_text.starts_with("5 tickets assigned to you"));
        assert_eq!(posts[0].1.buttons().filter(|button| button.url.is_some()).count(), 5);
        assert_eq!(harness.tickets.events().await.len(), 5);
    }

    #[tokio::test]
    async fn reply_without_message_asks_for_body() {
        let harness = Harness::new();
        harness.ticket("Verify", "verification", 1).await;
        let dispatcher = dispatcher(&harness, true).await;

        dispatcher
            .handle_mention(
                &mention("U100", "<@UBOT> reply to tickets about verification"),
                &EventContext::default(),
            )
            .await;

        assert_eq!(harness.responder.texts().await, vec![MISSING_REPLY_MESSAGE_TEXT.to_owned()]);
        assert!(harness.tickets.messages().await.is_empty());
    }

    #[tokio::test]
    async fn close_mention_only_prompts() {
        let harness = Harness::new();
        harness.ticket("Old refund", "refunds", 30).await;
        let dispatcher = dispatcher(&harness, true).await;

        dispatcher
            .handle_mention(
                &mention("U100", "<@UBOT> close all open tickets older than 10 days about refunds"),
                &EventContext::default(),
            )
            .await;

        let posts = harness.responder.posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(
            posts[0].1.buttons().map(|button| button.action_id.as_str()).collect::<Vec<_>>(),
            vec!["bulk_close_confirm", "bulk_close_cancel"]
        );
        assert!(harness.tickets.events().await.is_empty());
    }

    #[tokio::test]
    async fn close_with_window_beyond_calendar_range_finds_nothing() {
        let harness = Harness::new();
        harness.ticket("Old refund", "refunds", 30).await;
        let dispatcher = dispatcher(&harness, true).await;

        let result = dispatcher
            .handle_mention(
                &mention("U100", "<@UBOT> close all tickets older than 999999999 days about refunds"),
                &EventContext::default(),
            )
            .await;

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(harness.responder.texts().await, vec![NO_TICKETS_TO_CLOSE_TEXT.to_owned()]);
        assert!(harness.tickets.events().await.is_empty());
    }

    #[tokio::test]
    async fn stats_with_window_beyond_calendar_range_reports_all_time() {
        let harness = Harness::new();
        harness.ticket("Ancient", "legacy", 4000).await;
        let dispatcher = dispatcher(&harness, true).await;

        let result = dispatcher
            .handle_mention(
                &mention("U100", "<@UBOT> ticket stats for the last 99999999 days"),
                &EventContext::default(),
            )
            .await;

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(
            harness.responder.texts().await,
            vec!["Stats for the last 99999999 days".to_owned()]
        );
    }

    #[tokio::test]
    async fn search_failure_posts_generic_apology() {
        let harness = Harness::new();
        harness.search.set_unavailable(true);
        let dispatcher = dispatcher(&harness, true).await;

        let result = dispatcher
            .handle_mention(
                &mention("U100", "<@UBOT> give me tickets about billing"),
                &EventContext::default(),
            )
            .await;

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(
            harness.responder.texts().await,
            vec!["An error occurred while processing your request. Please try again.".to_owned()]
        );
    }

    #[tokio::test]
    async fn apology_carries_correlation_id() {
        let harness = Harness::new();
        harness.search.set_unavailable(true);
        let dispatcher = dispatcher(&harness, true).await;
        let ctx = EventContext { correlation_id: "Ev0042".to_owned() };

        dispatcher
            .handle_mention(&mention("U100", "<@UBOT> give me tickets about billing"), &ctx)
            .await;

        let posts = harness.responder.posts().await;
        assert_eq!(posts.len(), 1);
        let context_lines: Vec<&str> = posts[0]
            .1
            .blocks
            .iter()
            .filter_map(|block| match block {
                Block::Context { elements, .. } => Some(elements.iter().map(|element| element.text())),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(context_lines, vec!["Correlation ID: Ev0042"]);
    }

    #[tokio::test]
    async fn email_fallback_resolves_operator() {
        let responder = InMemoryResponder::default().with_email("U555", "RILEY@acme.test").await;
        let harness = Harness::with_responder(responder);
        let dispatcher = dispatcher(&harness, true).await;

        dispatcher
            .handle_mention(&mention("U555", "<@UBOT> what can you do"), &EventContext::default())
            .await;

        assert_eq!(harness.responder.texts().await, vec!["Here's what I can do".to_owned()]);
    }
}
