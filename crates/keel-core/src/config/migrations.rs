use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};
use crate::migration::DEFAULT_TARGET;

/// Migration tree and ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Root directory holding one subdirectory per target.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Migration stream to operate on.
    #[serde(default = "default_target")]
    pub target: String,

    /// Ledger table, optionally schema-qualified.
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,

    /// Create the ledger table before running instead of relying on a
    /// bootstrap migration.
    #[serde(default)]
    pub create_ledger: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            target: default_target(),
            ledger_table: default_ledger_table(),
            create_ledger: false,
        }
    }
}

impl MigrationsConfig {
    /// Fails unless the target is a single plain path component
    /// (`[A-Za-z0-9_-]+`), so it cannot point outside `root`.
    pub fn check_target(&self) -> Result<()> {
        let target = self.target.as_str();
        if target.is_empty()
            || !target
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(KeelError::Config(format!(
                "Invalid target '{}': only letters, digits, '_' and '-' are allowed",
                target
            )));
        }
        Ok(())
    }

    /// The validated ledger table name.
    pub fn ledger_table(&self) -> Result<LedgerTable> {
        LedgerTable::parse(&self.ledger_table)
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_target() -> String {
    DEFAULT_TARGET.to_string()
}

fn default_ledger_table() -> String {
    "keel_migrations".to_string()
}

/// A ledger table name that is safe to splice into SQL.
///
/// Accepts `table` or `schema.table` where each part is a plain identifier
/// (`[A-Za-z_][A-Za-z0-9_]*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTable {
    schema: Option<String>,
    table: String,
}

impl LedgerTable {
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        let (schema, table) = match name.split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, name),
        };

        for part in schema.iter().chain(std::iter::once(&table)) {
            if !is_identifier(part) {
                return Err(KeelError::Config(format!(
                    "Invalid ledger table name '{}': '{}' is not a plain identifier",
                    name, part
                )));
            }
        }

        Ok(Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl std::fmt::Display for LedgerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => f.write_str(&self.table),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
