//! Wire shapes for the Slack Events API and interactive callbacks.

use serde::Deserialize;

use crate::events::{BlockActionEvent, MentionEvent, SlackEvent};

/// Body of a `POST` to the Events API request URL.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsApiRequest {
    UrlVerification { challenge: String },
    EventCallback(EventCallback),
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventCallback {
    pub team_id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    pub event: CallbackEvent,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackEvent {
    AppMention(AppMentionPayload),
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppMentionPayload {
    pub user: String,
    pub text: String,
    pub channel: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl EventCallback {
    /// Envelope id used for correlation, falling back to the supplied value.
    pub fn correlation_id(&self, fallback: &str) -> String {
        self.event_id.clone().unwrap_or_else(|| fallback.to_owned())
    }

    pub fn into_event(self) -> SlackEvent {
        match self.event {
            CallbackEvent::AppMention(mention) if mention.bot_id.is_none() => {
                SlackEvent::AppMention(MentionEvent {
                    team_id: self.team_id,
                    user_id: mention.user,
                    text: mention.text,
                    channel_id: mention.channel,
                    thread_ts: mention.thread_ts.unwrap_or(mention.ts),
                })
            }
            CallbackEvent::AppMention(_) => {
                SlackEvent::Unsupported { event_type: "bot_app_mention".to_owned() }
            }
            CallbackEvent::Other => SlackEvent::Unsupported { event_type: "other".to_owned() },
        }
    }
}

/// The JSON document carried in the `payload` form field of an interaction.
#[derive(Clone, Debug, Deserialize)]
pub struct InteractionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: InteractionUser,
    #[serde(default)]
    pub team: Option<InteractionTeam>,
    #[serde(default)]
    pub channel: Option<InteractionChannel>,
    #[serde(default)]
    pub message: Option<InteractionMessage>,
    #[serde(default)]
    pub actions: Vec<InteractionAction>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionUser {
    pub id: String,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionTeam {
    pub id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionChannel {
    pub id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionMessage {
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionAction {
    pub action_id: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl InteractionPayload {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The first button press of a `block_actions` payload; anything else is unsupported.
    pub fn into_event(self) -> SlackEvent {
        if self.kind != "block_actions" {
            return SlackEvent::Unsupported { event_type: self.kind };
        }

        let team_id = self.team.map(|team| team.id).or(self.user.team_id);
        let (Some(team_id), Some(channel), Some(message), Some(action)) =
            (team_id, self.channel, self.message, self.actions.into_iter().next())
        else {
            return SlackEvent::Unsupported { event_type: "incomplete_block_actions".to_owned() };
        };

        SlackEvent::BlockAction(BlockActionEvent {
            team_id,
            user_id: self.user.id,
            channel_id: channel.id,
            message_ts: message.ts,
            thread_ts: message.thread_ts,
            action_id: action.action_id,
            value: action.value,
        })
    }
}
