use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use deskhand_core::config::SlackConfig;

use crate::blocks::MessageTemplate;

/// Where a reply goes: a channel plus the thread root timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadRef {
    pub channel_id: String,
    pub thread_ts: String,
}

impl ThreadRef {
    pub fn new(channel_id: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), thread_ts: thread_ts.into() }
    }
}

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("slack request failed: {0}")]
    Transport(String),
    #[error("slack api `{method}` returned error `{error}`")]
    Api { method: &'static str, error: String },
}

#[async_trait]
pub trait ChatResponder: Send + Sync {
    async fn post(&self, thread: &ThreadRef, message: &MessageTemplate)
        -> Result<(), ResponderError>;
}

/// Looks up the profile email of a chat user.
#[async_trait]
pub trait ChatProfileLookup: Send + Sync {
    async fn email_for(&self, user_id: &str) -> Result<Option<String>, ResponderError>;
}

#[derive(Deserialize)]
struct ApiAck {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct UsersInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<UsersInfoUser>,
}

#[derive(Deserialize)]
struct UsersInfoUser {
    #[serde(default)]
    profile: Option<UsersInfoProfile>,
}

#[derive(Deserialize)]
struct UsersInfoProfile {
    #[serde(default)]
    email: Option<String>,
}

/// Slack Web API client for `chat.postMessage` and `users.info`.
pub struct SlackWebClient {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(config: &SlackConfig) -> Result<Self, ResponderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| ResponderError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            bot_token: config.bot_token.clone(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base_url)
    }
}

pub fn post_message_body(thread: &ThreadRef, message: &MessageTemplate) -> serde_json::Value {
    let mut body = json!({
        "channel": thread.channel_id,
        "thread_ts": thread.thread_ts,
        "text": message.fallback_text,
    });
    if !message.blocks.is_empty() {
        body["blocks"] = json!(message.blocks);
    }
    body
}

#[async_trait]
impl ChatResponder for SlackWebClient {
    async fn post(
        &self,
        thread: &ThreadRef,
        message: &MessageTemplate,
    ) -> Result<(), ResponderError> {
        let response = self
            .http
            .post(self.endpoint("chat.postMessage"))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&post_message_body(thread, message))
            .send()
            .await
            .map_err(|error| ResponderError::Transport(error.to_string()))?;

        let ack: ApiAck = response
            .error_for_status()
            .map_err(|error| ResponderError::Transport(error.to_string()))?
            .json()
            .await
            .map_err(|error| ResponderError::Transport(error.to_string()))?;

        if !ack.ok {
            return Err(ResponderError::Api {
                method: "chat.postMessage",
                error: ack.error.unwrap_or_else(|| "unknown_error".to_owned()),
            });
        }

        tracing::debug!(
            event_name = "egress.slack.message_posted",
            channel_id = %thread.channel_id,
            thread_id = %thread.thread_ts,
            blocks = message.blocks.len(),
            "posted slack message"
        );
        Ok(())
    }
}

#[async_trait]
impl ChatProfileLookup for SlackWebClient {
    async fn email_for(&self, user_id: &str) -> Result<Option<String>, ResponderError> {
        let response: UsersInfoResponse = self
            .http
            .get(self.endpoint("users.info"))
            .bearer_auth(self.bot_token.expose_secret())
            .query(&[("user", user_id)])
            .send()
            .await
            .map_err(|error| ResponderError::Transport(error.to_string()))?
            .error_for_status()
            .map_err(|error| ResponderError::Transport(error.to_string()))?
            .json()
            .await
            .map_err(|error| ResponderError::Transport(error.to_string()))?;

        match (response.ok, response.error.as_deref()) {
            (true, _) => Ok(response
                .user
                .and_then(|user| user.profile)
                .and_then(|profile| profile.email)
                .filter(|email| !email.trim().is_empty())),
            (false, Some("user_not_found")) => Ok(None),
            (false, error) => Err(ResponderError::Api {
                method: "users.info",
                error: error.unwrap_or("unknown_error").to_owned(),
            }),
        }
    }
}

/// Records posted messages and serves canned profile emails.
#[derive(Default)]
pub struct InMemoryResponder {
    posts: Mutex<Vec<(ThreadRef, MessageTemplate)>>,
    emails: RwLock<HashMap<String, String>>,
    failing: AtomicBool,
}

impl InMemoryResponder {
    pub async fn with_email(self, user_id: &str, email: &str) -> Self {
        self.emails.write().await.insert(user_id.to_owned(), email.to_owned());
        self
    }

    /// Makes every subsequent post fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn posts(&self) -> Vec<(ThreadRef, MessageTemplate)> {
        self.posts.lock().await.clone()
    }

    pub async fn texts(&self) -> Vec<String> {
        self.posts.lock().await.iter().map(|(_, message)| message.fallback_text.clone()).collect()
    }
}

#[async_trait]
impl ChatResponder for InMemoryResponder {
    async fn post(
        &self,
        thread: &ThreadRef,
        message: &MessageTemplate,
    ) -> Result<(), ResponderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResponderError::Api {
                method: "chat.postMessage",
                error: "channel_not_found".to_owned(),
            });
        }
        self.posts.lock().await.push((thread.clone(), message.clone()));
        Ok(())
    }
}

#[async_trait]
impl ChatProfileLookup for InMemoryResponder {
    async fn email_for(&self, user_id: &str) -> Result<Option<String>, ResponderError> {
        Ok(self.emails.read().await.get(user_id).cloned())
    }
}
