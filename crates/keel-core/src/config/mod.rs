mod database;
mod migrations;

pub use database::DatabaseConfig;
pub use migrations::{LedgerTable, MigrationsConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{KeelError, Result};

/// Root configuration for keel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeelConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration tree and ledger configuration.
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

impl KeelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| KeelError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| KeelError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Configuration with defaults and the given connection string.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: Some(url.to_string()),
                ..Default::default()
            },
            migrations: MigrationsConfig::default(),
        }
    }

    /// Check everything that must hold before touching the database.
    pub fn validate(&self) -> Result<()> {
        self.database.require_url()?;
        self.migrations.ledger_table()?;
        self.migrations.check_target()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}.
///
/// Unset variables are left untouched.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
