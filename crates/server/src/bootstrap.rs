use std::sync::Arc;

use leadquote_core::audit::TracingAuditSink;
use leadquote_core::config::{AppConfig, ConfigError};
use leadquote_core::ports::Collaborators;
use leadquote_db::{connect_with_settings, migrations, DbPool, SqlDispatchLedger};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::backend::BackendClient;
use crate::channels::{HttpEmailGateway, HttpSmsGateway};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        backend = %config.backend.base_url,
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
        "dispatch ledger database connected"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let collaborators = collaborators(&config, db_pool.clone())?;
    let api = ApiState::new(&collaborators, &config, Arc::new(TracingAuditSink));

    Ok(Application { config, db_pool, api })
}

/// Backend stores, HTTP gateways and the sqlite ledger.
fn collaborators(config: &AppConfig, db_pool: DbPool) -> Result<Collaborators, BootstrapError> {
    let backend =
        Arc::new(BackendClient::new(&config.backend).map_err(BootstrapError::HttpClient)?);
    let sms = HttpSmsGateway::new(&config.messaging).map_err(BootstrapError::HttpClient)?;
    let email = HttpEmailGateway::new(&config.messaging).map_err(BootstrapError::HttpClient)?;

    Ok(Collaborators {
        leads: backend.clone(),
        quotes: backend.clone(),
        pricing_templates: backend.clone(),
        message_templates: backend.clone(),
        statuses: backend.clone(),
        variables: backend.clone(),
        sms: Arc::new(sms),
        email: Arc::new(email),
        plan: backend,
        ledger: Arc::new(SqlDispatchLedger::new(db_pool)),
    })
}

#[cfg(test)]
mod tests {
    use leadquote_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    fn options(database_url: &str, backend_base_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                backend_base_url: Some(backend_base_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_backend_url() {
        let result = bootstrap(options("sqlite::memory:", "ftp://backend.local")).await;

        let message = result.err().expect("invalid config").to_string();
        assert!(message.contains("backend.base_url"));
    }

    #[tokio::test]
    async fn bootstrap_applies_ledger_migrations() {
        let app = bootstrap(options("sqlite::memory:?cache=shared", "http://localhost:3000/api"))
            .await
            .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name = 'dispatch_step_record'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("ledger table");
        assert_eq!(table_count, 1);
        assert_eq!(app.config.backend.base_url, "http://localhost:3000/api");

        app.db_pool.close().await;
    }
}
