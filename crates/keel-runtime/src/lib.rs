pub mod db;
pub mod migrations;
pub mod testing;

pub use db::Database;
pub use migrations::{
    LedgerStore, LedgerTransaction, MigrationSource, MigrationUnit, Migrator, PgLedger,
    RunSummary, StatusReporter, StatusRow,
};
