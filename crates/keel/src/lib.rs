//! keel - ordered, per-target SQL migrations for PostgreSQL.
//!
//! The `keel` binary drives [`Migrator`] and [`StatusReporter`] from the
//! command line. Applications that migrate on startup can call [`migrate`].

pub use keel_core::config::{DatabaseConfig, MigrationsConfig};
pub use keel_core::{KeelConfig, KeelError, LedgerEntry, MigrationRef, Result, DEFAULT_TARGET};
pub use keel_runtime::{
    Database, LedgerStore, MigrationSource, MigrationUnit, Migrator, PgLedger, RunSummary,
    StatusReporter, StatusRow,
};

/// Validate `config`, connect, and prepare the ledger.
///
/// Configuration problems are reported before any connection attempt. The
/// ledger table is only created here when `migrations.create_ledger` is set.
pub async fn connect(config: &KeelConfig) -> Result<(Database, PgLedger)> {
    config.validate()?;
    let table = config.migrations.ledger_table()?;

    let db = Database::from_config(&config.database).await?;
    let ledger = PgLedger::new(db.pool().clone(), table);
    if config.migrations.create_ledger {
        ledger.ensure_table().await?;
    }

    Ok((db, ledger))
}

/// Apply every pending migration of the configured target.
pub async fn migrate(config: &KeelConfig) -> Result<RunSummary> {
    config.validate()?;
    let source = MigrationSource::new(&config.migrations.root);
    // Fail on a missing directory before opening a connection.
    source.list_units(&config.migrations.target)?;

    let (db, ledger) = connect(config).await?;
    let result = Migrator::new(source, ledger)
        .up(&config.migrations.target, 0)
        .await;
    db.close().await;
    result
}
