//! In-memory ledger for engine tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use keel_core::error::KeelError;
use keel_core::migration::{LedgerEntry, SortOrder};

use crate::migrations::{LedgerFuture, LedgerStore, LedgerTransaction};

/// Ledger kept in memory.
///
/// Writes made through a transaction are buffered and only become visible on
/// commit. Scripts are not interpreted; every script handed to a transaction
/// is recorded, and scripts containing a configured marker fail.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    rows: BTreeMap<(String, i64), LedgerEntry>,
    executed: Vec<String>,
    fail_marker: Option<String>,
    fail_removals: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every script containing `marker` fail.
    pub async fn fail_scripts_containing(&self, marker: impl Into<String>) {
        self.state.lock().await.fail_marker = Some(marker.into());
    }

    /// Make ledger row deletion fail.
    pub async fn fail_removals(&self, fail: bool) {
        self.state.lock().await.fail_removals = fail;
    }

    /// Insert a committed ledger row directly.
    pub async fn seed(&self, target: &str, id: i64, name: &str) {
        let entry = LedgerEntry {
            target: target.to_string(),
            id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .rows
            .insert((target.to_string(), id), entry);
    }

    /// Every script handed to a transaction, in order, including scripts that
    /// failed or were rolled back.
    pub async fn executed_scripts(&self) -> Vec<String> {
        self.state.lock().await.executed.clone()
    }

    /// Committed ids of a target, ascending.
    pub async fn applied_ids(&self, target: &str) -> Vec<i64> {
        self.state
            .lock()
            .await
            .rows
            .keys()
            .filter(|(t, _)| t == target)
            .map(|(_, id)| *id)
            .collect()
    }
}

impl LedgerStore for MemoryLedger {
    fn fetch_applied<'a>(
        &'a self,
        target: &'a str,
        order: SortOrder,
    ) -> LedgerFuture<'a, Vec<LedgerEntry>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut entries: Vec<LedgerEntry> = state
                .rows
                .values()
                .filter(|e| e.target == target)
                .cloned()
                .collect();
            if order == SortOrder::Descending {
                entries.reverse();
            }
            Ok(entries)
        })
    }

    fn begin(&self) -> LedgerFuture<'_, Box<dyn LedgerTransaction>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            Ok(Box::new(MemoryTransaction {
                state,
                pending: Vec::new(),
            }) as Box<dyn LedgerTransaction>)
        })
    }
}

enum Pending {
    Insert(LedgerEntry),
    Remove(String, i64),
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<Pending>,
}

impl MemoryTransaction {
    /// Whether `(target, id)` would exist if this transaction committed now.
    fn visible(&self, state: &MemoryState, target: &str, id: i64) -> bool {
        let mut present = state.rows.contains_key(&(target.to_string(), id));
        for op in &self.pending {
            match op {
                Pending::Insert(e) if e.target == target && e.id == id => present = true,
                Pending::Remove(t, i) if t == target && *i == id => present = false,
                _ => {}
            }
        }
        present
    }
}

impl LedgerTransaction for MemoryTransaction {
    fn execute_script<'a>(&'a mut self, sql: &'a str) -> LedgerFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.executed.push(sql.to_string());
            match &state.fail_marker {
                Some(marker) if sql.contains(marker.as_str()) => Err(KeelError::Script(format!(
                    "script contains failure marker '{}'",
                    marker
                ))),
                _ => Ok(()),
            }
        })
    }

    fn record_applied<'a>(
        &'a mut self,
        target: &'a str,
        id: i64,
        name: &'a str,
    ) -> LedgerFuture<'a, ()> {
        Box::pin(async move {
            let state = Arc::clone(&self.state);
            let state = state.lock().await;
            if self.visible(&state, target, id) {
                return Err(KeelError::Database(format!(
                    "duplicate key value violates unique constraint: ({}, {})",
                    target, id
                )));
            }
            drop(state);

            self.pending.push(Pending::Insert(LedgerEntry {
                target: target.to_string(),
                id,
                name: name.to_string(),
                created_at: Utc::now(),
            }));
            Ok(())
        })
    }

    fn remove_applied<'a>(&'a mut self, target: &'a str, id: i64) -> LedgerFuture<'a, ()> {
        Box::pin(async move {
            if self.state.lock().await.fail_removals {
                return Err(KeelError::Database(format!(
                    "simulated failure removing ({}, {})",
                    target, id
                )));
            }
            self.pending.push(Pending::Remove(target.to_string(), id));
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> LedgerFuture<'static, ()> {
        let MemoryTransaction { state, pending } = *self;
        Box::pin(async move {
            let mut state = state.lock().await;
            for op in pending {
                match op {
                    Pending::Insert(entry) => {
                        state.rows.insert((entry.target.clone(), entry.id), entry);
                    }
                    Pending::Remove(target, id) => {
                        state.rows.remove(&(target, id));
                    }
                }
            }
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> LedgerFuture<'static, ()> {
        Box::pin(async move { Ok(()) })
    }
}
