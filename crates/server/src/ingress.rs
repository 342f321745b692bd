//! HTTP endpoints Slack delivers events and button clicks to.
//!
//! Slack expects an answer within three seconds, so every request is acknowledged before any
//! work happens and the dispatch runs on a tracked background task.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use deskhand_slack::events::{EventContext, EventDispatcher, SlackEnvelope};
use deskhand_slack::payloads::{EventsApiRequest, InteractionPayload};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Clone)]
pub struct Ingress {
    dispatcher: Arc<EventDispatcher>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

#[derive(Debug, Deserialize)]
pub struct InteractionForm {
    pub payload: String,
}

impl Ingress {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self { dispatcher: Arc::new(dispatcher), tasks: Arc::new(Mutex::new(JoinSet::new())) }
    }

    pub fn handler_count(&self) -> usize {
        self.dispatcher.handler_count()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/slack/events", post(events))
            .route("/slack/actions", post(actions))
            .with_state(self.clone())
    }

    /// Waits for in-flight dispatches. Returns `false` if the timeout elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut tasks = self.tasks.lock().await;
        tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok()
    }

    async fn spawn_dispatch(&self, envelope: SlackEnvelope, ctx: EventContext) {
        let dispatcher = self.dispatcher.clone();
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            if let Err(error) = dispatcher.dispatch(&envelope, &ctx).await {
                tracing::error!(
                    event_name = "ingress.slack.dispatch_failed",
                    correlation_id = %ctx.correlation_id,
                    envelope_id = %envelope.envelope_id,
                    error = %error,
                    "slack event dispatch failed"
                );
            }
        });
    }
}

async fn events(
    State(ingress): State<Ingress>,
    Json(request): Json<EventsApiRequest>,
) -> Response {
    match request {
        EventsApiRequest::UrlVerification { challenge } => {
            tracing::info!(
                event_name = "ingress.slack.url_verification",
                correlation_id = "url_verification",
                "answering slack url verification"
            );
            Json(json!({ "challenge": challenge })).into_response()
        }
        EventsApiRequest::EventCallback(callback) => {
            let correlation_id = callback.correlation_id(&Uuid::new_v4().to_string());
            let envelope =
                SlackEnvelope { envelope_id: correlation_id.clone(), event: callback.into_event() };
            ingress.spawn_dispatch(envelope, EventContext { correlation_id }).await;
            StatusCode::OK.into_response()
        }
        EventsApiRequest::Other => StatusCode::OK.into_response(),
    }
}

async fn actions(State(ingress): State<Ingress>, Form(form): Form<InteractionForm>) -> Response {
    let payload = match InteractionPayload::parse(&form.payload) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(
                event_name = "ingress.slack.interaction_malformed",
                correlation_id = "unknown",
                error = %error,
                "could not parse interaction payload"
            );
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let correlation_id = Uuid::new_v4().to_string();
    let envelope =
        SlackEnvelope { envelope_id: correlation_id.clone(), event: payload.into_event() };
    ingress.spawn_dispatch(envelope, EventContext { correlation_id }).await;
    StatusCode::OK.into_response()
}
