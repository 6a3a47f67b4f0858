use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default)]
    pub url: Option<String>,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pool checkout timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,

    /// Statement timeout in seconds, 0 disables it.
    #[serde(default)]
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
            statement_timeout_secs: 0,
        }
    }
}

impl DatabaseConfig {
    /// The connection URL, or a configuration error if none was given.
    pub fn require_url(&self) -> Result<&str> {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(KeelError::Config(
                "Database connection string is required (set PGSTRING or --database-url)"
                    .to_string(),
            )),
        }
    }
}

// Migrations run sequentially on one connection; the second covers ledger reads
// made while a transaction is open.
fn default_pool_size() -> u32 {
    2
}

fn default_pool_timeout() -> u64 {
    30
}
