//! Identity types shared by the migration source, the ledger and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target used when none is configured.
pub const DEFAULT_TARGET: &str = "default";

/// Identity of a migration within a target.
///
/// Displays as `{id}_{name}`, which is also the composite key used when
/// reconciling disk and ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationRef {
    pub id: i64,
    pub name: String,
}

impl MigrationRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Composite `{id}_{name}` key.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Parse a migration directory name like `12_add_users`.
    ///
    /// The id is everything before the first `_` and must be all ASCII digits.
    /// A name without `_` yields an empty migration name. Returns `None` when
    /// there is no numeric prefix.
    pub fn parse_dir_name(dir_name: &str) -> Option<Self> {
        let (id_part, name) = match dir_name.split_once('_') {
            Some((id, name)) => (id, name),
            None => (dir_name, ""),
        };

        let id_part = id_part.trim();
        if id_part.is_empty() || !id_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let id = id_part.parse::<i64>().ok()?;
        Some(Self::new(id, name))
    }
}

impl std::fmt::Display for MigrationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.id, self.name)
    }
}

/// A row of the applied-migrations ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub target: String,
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn migration(&self) -> MigrationRef {
        MigrationRef::new(self.id, self.name.clone())
    }
}

/// Ordering of ledger reads by migration id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}
