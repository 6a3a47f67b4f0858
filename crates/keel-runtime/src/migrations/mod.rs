//! Migration discovery, the applied-migrations ledger, and the up/down/status
//! algorithms built on top of them.

mod engine;
mod ledger;
mod source;
mod sql;
mod status;

pub use engine::{Migrator, RunSummary, SkipReason, Skipped};
pub use ledger::{LedgerFuture, LedgerStore, LedgerTransaction, PgLedger};
pub use source::{MigrationSource, MigrationUnit};
pub use sql::split_sql_statements;
pub use status::{StatusReporter, StatusRow};
