use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

use keel_core::config::DatabaseConfig;
use keel_core::error::{KeelError, Result};

/// Database connection wrapper for a single migration invocation.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
    description: String,
}

impl Database {
    /// Connect using the given configuration.
    ///
    /// Fails with a configuration error before any connection attempt when no
    /// URL is configured or the URL does not parse.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let description = describe(&options);

        info!("Connecting to {}", description);
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| {
                KeelError::Database(format!("Failed to connect to {}: {}", description, e))
            })?;

        Ok(Self { pool, description })
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `host:port/database`, without credentials.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Close all connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    let url = config.require_url()?;
    let mut options = PgConnectOptions::from_str(url)
        .map_err(|e| KeelError::Config(format!("Invalid connection string: {}", e)))?;

    if config.statement_timeout_secs > 0 {
        options = options.options([(
            "statement_timeout",
            format!("{}s", config.statement_timeout_secs),
        )]);
    }

    Ok(options)
}

fn describe(options: &PgConnectOptions) -> String {
    format!(
        "{}:{}/{}",
        options.get_host(),
        options.get_port(),
        options.get_database().unwrap_or("postgres")
    )
}
