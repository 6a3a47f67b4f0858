//! Disk vs ledger reconciliation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use keel_core::error::Result;
use keel_core::migration::{MigrationRef, SortOrder};

use super::ledger::LedgerStore;
use super::source::MigrationSource;

/// One line of a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub id: i64,
    pub name: String,
    pub on_disk: bool,
    pub in_ledger: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

impl StatusRow {
    fn new(migration: &MigrationRef) -> Self {
        Self {
            id: migration.id,
            name: migration.name.clone(),
            on_disk: false,
            in_ledger: false,
            applied_at: None,
        }
    }

    pub fn key(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }

    /// On disk but not applied.
    pub fn is_pending(&self) -> bool {
        self.on_disk && !self.in_ledger
    }
}

/// Builds status reports for a target.
pub struct StatusReporter<S> {
    source: MigrationSource,
    store: S,
}

impl<S: LedgerStore> StatusReporter<S> {
    pub fn new(source: MigrationSource, store: S) -> Self {
        Self { source, store }
    }

    /// Union of on-disk units and ledger rows, keyed by `{id}_{name}`.
    ///
    /// Rows are ordered by that key as a string, so `10_x` sorts before `2_y`.
    pub async fn report(&self, target: &str) -> Result<Vec<StatusRow>> {
        let ledger = self
            .store
            .fetch_applied(target, SortOrder::Ascending)
            .await?;
        let on_disk = self.source.inventory(target)?;

        let mut rows: BTreeMap<String, StatusRow> = BTreeMap::new();
        for unit in &on_disk {
            rows.entry(unit.migration().key())
                .or_insert_with(|| StatusRow::new(unit.migration()))
                .on_disk = true;
        }
        for entry in &ledger {
            let migration = entry.migration();
            let row = rows
                .entry(migration.key())
                .or_insert_with(|| StatusRow::new(&migration));
            row.in_ledger = true;
            row.applied_at = Some(entry.created_at);
        }

        Ok(rows.into_values().collect())
    }
}
