use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use deskhand_core::audit::{AuditSink, TracingAuditSink};
use deskhand_core::config::{AppConfig, ConfigError, LoadOptions};
use deskhand_core::{CommandInterpreter, DescriptorCodec};
use deskhand_db::repositories::{
    RosterRepository, SearchGateway, SqlRosterRepository, SqlSearchIndex, SqlTicketRepository,
    TicketRepository,
};
use deskhand_db::{connect, migrations, DbPool};
use deskhand_slack::bulk::BulkActionExecutor;
use deskhand_slack::confirm::ConfirmationHandler;
use deskhand_slack::events::EventDispatcher;
use deskhand_slack::identity::OperatorResolver;
use deskhand_slack::mention::MentionDispatcher;
use deskhand_slack::responder::{
    ChatProfileLookup, ChatResponder, ResponderError, SlackWebClient,
};
use deskhand_slack::stats::StatsReporter;
use thiserror::Error;
use tracing::info;

use crate::{health, ingress::Ingress};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub ingress: Ingress,
}

impl Application {
    pub fn router(&self) -> Router {
        self.ingress.router().merge(health::router(self.db_pool.clone()))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("slack client setup failed: {0}")]
    Slack(#[from] ResponderError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let slack = Arc::new(SlackWebClient::new(&config.slack)?);
    let dispatcher = build_dispatcher(&config, &db_pool, slack.clone(), slack);
    info!(
        event_name = "system.bootstrap.handlers_registered",
        correlation_id = "bootstrap",
        handlers = dispatcher.handler_count(),
        "slack handlers registered"
    );

    Ok(Application { config, db_pool, ingress: Ingress::new(dispatcher) })
}

/// Wires repositories, the bulk executor and both slack handlers over one pool.
pub fn build_dispatcher(
    config: &AppConfig,
    db_pool: &DbPool,
    responder: Arc<dyn ChatResponder>,
    profiles: Arc<dyn ChatProfileLookup>,
) -> EventDispatcher {
    let tickets: Arc<dyn TicketRepository> = Arc::new(SqlTicketRepository::new(db_pool.clone()));
    let roster: Arc<dyn RosterRepository> = Arc::new(SqlRosterRepository::new(db_pool.clone()));
    let search: Arc<dyn SearchGateway> =
        Arc::new(SqlSearchIndex::new(db_pool.clone(), &config.commands.search_index_key));
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    let codec = DescriptorCodec::new(
        config.commands.descriptor_signing_key.clone(),
        config.commands.confirmation_ttl_secs.map(Duration::from_secs),
    );
    let executor = Arc::new(BulkActionExecutor::new(
        tickets.clone(),
        search,
        responder.clone(),
        codec.clone(),
        config.commands.app_base_url.clone(),
        audit.clone(),
    ));
    let resolver = Arc::new(OperatorResolver::new(roster.clone(), profiles));

    let mentions = MentionDispatcher::new(
        roster.clone(),
        resolver.clone(),
        CommandInterpreter::new(config.commands.defaults()),
        executor.clone(),
        StatsReporter::new(tickets, responder.clone()),
        responder.clone(),
        audit.clone(),
    );
    let confirmations =
        ConfirmationHandler::new(roster, resolver, codec, executor, responder, audit);

    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(Arc::new(mentions));
    dispatcher.register(Arc::new(confirmations));
    dispatcher
}

#[cfg(test)]
mod tests {
    use deskhand_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_bot_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                descriptor_signing_key: Some("signing-key-0123456789".to_string()),
                search_index_key: Some("search-key".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("slack.bot_token"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_schema_and_registers_both_handlers() {
        let app = bootstrap(valid_overrides("sqlite::memory:"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('tenant', 'operator', 'ticket', 'ticket_event')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected schema after bootstrap");
        assert_eq!(table_count, 4);
        assert_eq!(app.ingress.handler_count(), 2);

        app.db_pool.close().await;
    }

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                slack_bot_token: Some("xoxb-test".to_string()),
                descriptor_signing_key: Some("signing-key-0123456789".to_string()),
                search_index_key: Some("search-key".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }
}
