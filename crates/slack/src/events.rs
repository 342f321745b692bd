use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(MentionEvent),
    BlockAction(BlockActionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Tenant workspace and thread used for log correlation.
    pub fn correlation_fields(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::AppMention(event) => {
                (Some(event.team_id.as_str()), Some(event.thread_ts.as_str()))
            }
            Self::BlockAction(event) => (
                Some(event.team_id.as_str()),
                Some(event.thread_ts.as_deref().unwrap_or(&event.message_ts)),
            ),
            Self::Unsupported { .. } => (None, None),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    BlockAction,
    Unsupported,
}

/// A bot mention, with the reply thread already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MentionEvent {
    pub team_id: String,
    pub user_id: String,
    pub text: String,
    pub channel_id: String,
    pub thread_ts: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub team_id: String,
    pub user_id: String,
    pub channel_id: String,
    pub message_ts: String,
    pub thread_ts: Option<String>,
    pub action_id: String,
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("handler received an unexpected event: {0}")]
    UnexpectedEvent(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(handler.event_type(), handler);
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let (team_id, thread_id) = envelope.event.correlation_fields();
        tracing::info!(
            event_name = "ingress.slack.envelope_received",
            envelope_id = %envelope.envelope_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %ctx.correlation_id,
            team_id = team_id.unwrap_or("unknown"),
            thread_id = thread_id.unwrap_or("unknown"),
            "received slack envelope"
        );

        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
