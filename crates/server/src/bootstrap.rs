use std::sync::Arc;
use std::time::Duration;

use prcard_core::config::{AppConfig, ConfigError, LoadOptions};
use prcard_core::oauth::TokenError;
use prcard_db::{connect_with_settings, migrations, DbPool, Stores};
use prcard_relay::{AccessTokens, BitbucketOAuthClient, ReconciliationEngine, WebhookDispatcher};
use prcard_slack::sink::{SinkError, SlackWebApiSink};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub dispatcher: WebhookDispatcher,
    /// Bearer tokens for outbound Bitbucket API calls, refreshed ahead of expiry. Present only
    /// when OAuth consumer credentials are configured; the health route reports which.
    pub access_tokens: Option<AccessTokens>,
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
    Slack(#[source] SinkError),
    #[error("bitbucket oauth client setup failed: {0}")]
    OAuthClient(#[source] TokenError),
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

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
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

    let stores = Stores::sql(db_pool.clone());
    let sink = SlackWebApiSink::new(
        config.slack.api_base_url.clone(),
        config.slack.bot_token.clone(),
        Duration::from_secs(config.slack.timeout_secs),
    )
    .map_err(BootstrapError::Slack)?;
    let engine = ReconciliationEngine::new(
        stores.clone(),
        Arc::new(sink),
        &config.bitbucket.web_base_url,
    );
    let dispatcher = WebhookDispatcher::new(stores.subscriptions.clone(), Arc::new(engine));

    let access_tokens = match config.bitbucket_client_credentials() {
        Some((client_id, client_secret)) => {
            let client = BitbucketOAuthClient::new(
                config.bitbucket.token_url.clone(),
                client_id,
                client_secret,
                Duration::from_secs(config.slack.timeout_secs),
            )
            .map_err(BootstrapError::OAuthClient)?;
            Some(AccessTokens::new(stores.tokens.clone(), Arc::new(client)))
        }
        None => None,
    };
    info!(
        event_name = "system.bootstrap.wired",
        correlation_id = "bootstrap",
        oauth_enabled = access_tokens.is_some(),
        "relay components wired"
    );

    Ok(Application { config, db_pool, dispatcher, access_tokens })
}
