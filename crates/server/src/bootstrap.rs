use std::sync::Arc;
use std::time::Duration;

use spendflow_core::config::{AppConfig, ConfigError, LoadOptions};
use spendflow_core::currency::{NoRates, RateProvider};
use spendflow_db::{connect_with_config, migrations, DbPool, ExpenseWorkflow};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::audit::TracingAuditSink;
use crate::rates::HttpRateProvider;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: Arc<ExpenseWorkflow>,
    pub rates: Arc<dyn RateProvider>,
}

impl Application {
    pub fn api_state(&self) -> ApiState {
        ApiState {
            workflow: self.workflow.clone(),
            rates: self.rates.clone(),
            rate_timeout: Duration::from_secs(self.config.currency.timeout_secs),
        }
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
    #[error("rate provider setup failed: {0}")]
    RateProvider(#[source] reqwest::Error),
}

#[allow(dead_code)]
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

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let rates: Arc<dyn RateProvider> = if config.currency.enabled {
        Arc::new(
            HttpRateProvider::new(
                &config.currency.api_base_url,
                Duration::from_secs(config.currency.timeout_secs),
            )
            .map_err(BootstrapError::RateProvider)?,
        )
    } else {
        Arc::new(NoRates)
    };
    info!(
        event_name = "system.bootstrap.currency_configured",
        correlation_id = "bootstrap",
        conversion_enabled = config.currency.enabled,
        "currency conversion configured"
    );

    let workflow = Arc::new(
        ExpenseWorkflow::new(db_pool.clone()).with_audit_sink(Arc::new(TracingAuditSink)),
    );

    Ok(Application { config, db_pool, workflow, rates })
}
