//! The applied-migrations ledger.
//!
//! Engine and reporter only talk to the ledger through [`LedgerStore`], so the
//! PostgreSQL implementation can be swapped for an in-memory one in tests.

mod postgres;

pub use postgres::PgLedger;

use std::future::Future;
use std::pin::Pin;

use keel_core::error::Result;
use keel_core::migration::{LedgerEntry, SortOrder};

/// Boxed future returned by ledger operations.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistent record of applied migrations, keyed by `(target, id)`.
pub trait LedgerStore: Send + Sync {
    /// Applied migrations of a target, ordered by id.
    ///
    /// A ledger that does not exist yet reads as empty.
    fn fetch_applied<'a>(
        &'a self,
        target: &'a str,
        order: SortOrder,
    ) -> LedgerFuture<'a, Vec<LedgerEntry>>;

    /// Open a transaction. Dropping it without committing rolls it back.
    fn begin(&self) -> LedgerFuture<'_, Box<dyn LedgerTransaction>>;
}

/// A unit of work against the ledger's database.
pub trait LedgerTransaction: Send {
    /// Run a migration script.
    fn execute_script<'a>(&'a mut self, sql: &'a str) -> LedgerFuture<'a, ()>;

    /// Insert a ledger row stamped with the current time.
    fn record_applied<'a>(&'a mut self, target: &'a str, id: i64, name: &'a str)
        -> LedgerFuture<'a, ()>;

    /// Delete a ledger row.
    fn remove_applied<'a>(&'a mut self, target: &'a str, id: i64) -> LedgerFuture<'a, ()>;

    fn commit(self: Box<Self>) -> LedgerFuture<'static, ()>;

    fn rollback(self: Box<Self>) -> LedgerFuture<'static, ()>;
}
