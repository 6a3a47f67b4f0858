pub mod config;
pub mod error;
pub mod migration;

pub use config::KeelConfig;
pub use error::{KeelError, Result};
pub use migration::{LedgerEntry, MigrationRef, SortOrder, DEFAULT_TARGET};
