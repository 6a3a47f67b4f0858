//! Apply and roll back migration units for one target.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use keel_core::error::{KeelError, Result};
use keel_core::migration::{LedgerEntry, MigrationRef, SortOrder};

use super::ledger::LedgerStore;
use super::source::{MigrationSource, MigrationUnit};

/// Why a unit was passed over during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyApplied,
    MissingUpScript,
    MissingDownScript,
    MissingDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub migration: MigrationRef,
    pub reason: SkipReason,
}

/// Outcome of an apply or rollback run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Units whose script was executed and committed, in execution order.
    pub processed: Vec<MigrationRef>,
    pub skipped: Vec<Skipped>,
    /// Rolled back units whose ledger row could not be deleted afterwards.
    pub ledger_failures: Vec<MigrationRef>,
    /// The run stopped because the step limit was reached.
    pub step_limit_reached: bool,
}

impl RunSummary {
    fn skip(&mut self, migration: &MigrationRef, reason: SkipReason) {
        self.skipped.push(Skipped {
            migration: migration.clone(),
            reason,
        });
    }

    /// Record a processed unit; true when `steps` (0 = unlimited) is now used up.
    fn complete(&mut self, migration: MigrationRef, steps: usize) -> bool {
        self.processed.push(migration);
        self.step_limit_reached = steps > 0 && self.processed.len() >= steps;
        self.step_limit_reached
    }
}

/// Runs migrations from a [`MigrationSource`] against a [`LedgerStore`].
///
/// One target per call. Apply wraps each up-script and its ledger insert in a
/// single transaction. Rollback commits the down-script first and deletes the
/// ledger row in a second transaction; if that delete fails the row survives
/// although the script was reverted, and the run carries on.
pub struct Migrator<S> {
    source: MigrationSource,
    store: S,
}

impl<S: LedgerStore> Migrator<S> {
    pub fn new(source: MigrationSource, store: S) -> Self {
        Self { source, store }
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply pending units in ascending id order.
    ///
    /// `steps` caps the number of units applied; 0 applies everything.
    pub async fn up(&self, target: &str, steps: usize) -> Result<RunSummary> {
        info!("Starting migration process for target '{}'", target);

        let units = self.source.list_units(target)?;
        let applied: HashSet<i64> = self
            .store
            .fetch_applied(target, SortOrder::Ascending)
            .await?
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        debug!("Already applied migrations: {:?}", applied);

        let mut summary = RunSummary::default();
        for unit in &units {
            let migration = unit.migration();

            if applied.contains(&unit.id()) {
                debug!("Skipping migration: {}", migration);
                summary.skip(migration, SkipReason::AlreadyApplied);
                continue;
            }

            let sql = match unit.read_up() {
                Ok(sql) => sql,
                Err(e) if e.is_missing_script() => {
                    warn!("{}", e);
                    summary.skip(migration, SkipReason::MissingUpScript);
                    continue;
                }
                Err(e) => return Err(e.in_migration(target, migration)),
            };

            info!("Applying migration: {} (target '{}')", migration, target);
            self.apply_one(target, migration, &sql).await?;
            info!("Migration {} applied successfully", migration);

            if summary.complete(migration.clone(), steps) {
                info!(
                    "Applied {} migration(s) for target '{}', stopping as requested",
                    steps, target
                );
                break;
            }
        }

        info!(
            "Migration process for target '{}' completed: {} applied",
            target,
            summary.processed.len()
        );
        Ok(summary)
    }

    /// Roll back applied units, most recent first.
    ///
    /// The ledger decides what gets rolled back; the scripts are looked up on
    /// disk by id, falling back to the `{id}_{name}` directory the unit was
    /// applied from. `steps` caps the number of units rolled back; 0 means all.
    pub async fn down(&self, target: &str, steps: usize) -> Result<RunSummary> {
        info!("Starting rollback process for target '{}'", target);

        let mut summary = RunSummary::default();
        let applied = self
            .store
            .fetch_applied(target, SortOrder::Descending)
            .await?;
        if applied.is_empty() {
            info!("No migrations to rollback for target '{}'", target);
            return Ok(summary);
        }

        // Duplicates elsewhere in the tree do not block rolling back other units.
        let on_disk = self.source.inventory(target)?;

        for entry in &applied {
            let migration = entry.migration();

            let unit = match find_by_id(&on_disk, entry)? {
                Some(unit) => Some(unit.clone()),
                None => self.source.historical_unit(target, &migration),
            };
            let Some(unit) = unit else {
                warn!(
                    "Migration directory not found for {} (target '{}'), skipping",
                    migration, target
                );
                summary.skip(&migration, SkipReason::MissingDirectory);
                continue;
            };
            if unit.name() != entry.name {
                debug!(
                    "Ledger entry {} is on disk as {}",
                    migration,
                    unit.migration()
                );
            }

            let sql = match unit.read_down() {
                Ok(sql) => sql,
                Err(e) if e.is_missing_script() => {
                    warn!("{}", e);
                    summary.skip(&migration, SkipReason::MissingDownScript);
                    continue;
                }
                Err(e) => return Err(e.in_migration(target, &migration)),
            };

            info!("Rolling back migration: {} (target '{}')", migration, target);
            self.revert_one(target, &migration, &sql).await?;
            info!("Migration {} rolled back successfully", migration);

            match self.forget(target, &migration).await {
                Ok(()) => info!("Migration record {} deleted successfully", migration),
                Err(e) => {
                    error!(
                        "Error deleting migration record {} (target '{}'): {}",
                        migration, target, e
                    );
                    summary.ledger_failures.push(migration.clone());
                }
            }

            if summary.complete(migration, steps) {
                info!(
                    "Rolled back {} migration(s) for target '{}', stopping as requested",
                    steps, target
                );
                break;
            }
        }

        info!(
            "Rollback process for target '{}' completed: {} rolled back",
            target,
            summary.processed.len()
        );
        Ok(summary)
    }

    /// Execute an up-script and record it, atomically.
    async fn apply_one(&self, target: &str, migration: &MigrationRef, sql: &str) -> Result<()> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| e.in_migration(target, migration))?;

        let result = async {
            tx.execute_script(sql).await?;
            tx.record_applied(target, migration.id, &migration.name)
                .await
        }
        .await;

        match result {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| e.in_migration(target, migration)),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Failed to roll back {}: {}", migration, rollback_err);
                }
                error!(
                    "Error applying migration {} (target '{}'): {}",
                    migration, target, e
                );
                Err(e.in_migration(target, migration))
            }
        }
    }

    /// Execute a down-script in its own transaction.
    async fn revert_one(&self, target: &str, migration: &MigrationRef, sql: &str) -> Result<()> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| e.in_migration(target, migration))?;

        match tx.execute_script(sql).await {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| e.in_migration(target, migration)),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Failed to roll back {}: {}", migration, rollback_err);
                }
                error!(
                    "Error rolling back migration {} (target '{}'): {}",
                    migration, target, e
                );
                Err(e.in_migration(target, migration))
            }
        }
    }

    /// Delete a ledger row in a transaction of its own.
    async fn forget(&self, target: &str, migration: &MigrationRef) -> Result<()> {
        let mut tx = self.store.begin().await?;
        if let Err(e) = tx.remove_applied(target, migration.id).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Failed to roll back {}: {}", migration, rollback_err);
            }
            return Err(e);
        }
        tx.commit().await
    }
}

/// The directory a ledger entry should be rolled back from.
///
/// Among several directories sharing the entry's id, the one with the
/// recorded name wins; anything else is ambiguous.
fn find_by_id<'a>(
    units: &'a [MigrationUnit],
    entry: &LedgerEntry,
) -> Result<Option<&'a MigrationUnit>> {
    let candidates: Vec<&MigrationUnit> =
        units.iter().filter(|u| u.id() == entry.id).collect();
    if candidates.len() <= 1 {
        return Ok(candidates.into_iter().next());
    }

    let mut named = candidates.iter().filter(|u| u.name() == entry.name);
    match (named.next(), named.next()) {
        (Some(unit), None) => Ok(Some(*unit)),
        _ => Err(KeelError::InvalidMigration(format!(
            "Duplicate migration id {} in target '{}': cannot tell which directory to roll back ({})",
            entry.id,
            entry.target,
            candidates
                .iter()
                .map(|u| u.path().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::StatusReporter;
    use crate::testing::MemoryLedger;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_unit(root: &Path, target: &str, dir: &str, up: Option<&str>, down: Option<&str>) {
        let path = root.join(target).join(dir);
        fs::create_dir_all(&path).unwrap();
        if let Some(sql) = up {
            fs::write(path.join("up.sql"), sql).unwrap();
        }
        if let Some(sql) = down {
            fs::write(path.join("down.sql"), sql).unwrap();
        }
    }

    /// Three units with ids written out of order.
    fn three_units(root: &Path, target: &str) {
        write_unit(root, target, "3_third", Some("UP 3"), Some("DOWN 3"));
        write_unit(root, target, "1_first", Some("UP 1"), Some("DOWN 1"));
        write_unit(root, target, "2_second", Some("UP 2"), Some("DOWN 2"));
    }

    fn migrator(root: &Path) -> (Migrator<MemoryLedger>, MemoryLedger) {
        let ledger = MemoryLedger::new();
        (
            Migrator::new(MigrationSource::new(root), ledger.clone()),
            ledger,
        )
    }

    fn keys(migrations: &[MigrationRef]) -> Vec<String> {
        migrations.iter().map(MigrationRef::key).collect()
    }

    #[tokio::test]
    async fn test_up_applies_in_numeric_order() {
        let dir = TempDir::new().unwrap();
        three_units(dir.path(), "default");
        let (migrator, ledger) = migrator(dir.path());

        let summary = migrator.up("default", 0).await.unwrap();

        assert_eq!(keys(&summary.processed), vec!["1_first", "2_second", "3_third"]);
        assert_eq!(ledger.executed_scripts().await, vec!["UP 1", "UP 2", "UP 3"]);
        assert_eq!(ledger.applied_ids("default").await, vec![1, 2, 3]);
        assert!(!summary.step_limit_reached);
    }

    #[tokio::test]
    async fn test_up_is_idempotent() {
        let dir = TempDir::new().unwrap();
        three_units(dir.path(), "default");
        let (migrator, ledger) = migrator(dir.path());

        migrator.up("default", 0).await.unwrap();
        let second = migrator.up("default", 0).await.unwrap();

        assert!(second.processed.is_empty());
        assert_eq!(second.skipped.len(), 3);
        assert!(second
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::AlreadyApplied));
        assert_eq!(ledger.executed_scripts().await.len(), 3);
    }

    #[tokio::test]
    async fn test_up_failure_halts_run_and_keeps_ledger_consistent() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "1_first", Some("UP 1"), None);
        write_unit(dir.path(), "default", "2_broken", Some("UP 2 FAIL"), None);
        write_unit(dir.path(), "default", "3_third", Some("UP 3"), None);
        let (migrator, ledger) = migrator(dir.path());
        ledger.fail_scripts_containing("FAIL").await;

        let err = migrator.up("default", 0).await.unwrap_err();

        match &err {
            KeelError::Migration {
                target, migration, ..
            } => {
                assert_eq!(target, "default");
                assert_eq!(migration, "2_broken");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger.applied_ids("default").await, vec![1]);
        assert_eq!(ledger.executed_scripts().await, vec!["UP 1", "UP 2 FAIL"]);
    }

    #[tokio::test]
    async fn test_up_step_limit() {
        let dir = TempDir::new().unwrap();
        three_units(dir.path(), "default");
        let (migrator, ledger) = migrator(dir.path());

        let summary = migrator.up("default", 1).await.unwrap();
        assert_eq!(keys(&summary.processed), vec!["1_first"]);
        assert!(summary.step_limit_reached);
        assert_eq!(ledger.applied_ids("default").await, vec![1]);

        // Already-applied units do not count towards the limit.
        let summary = migrator.up("default", 1).await.unwrap();
        assert_eq!(keys(&summary.processed), vec!["2_second"]);
        assert_eq!(ledger.applied_ids("default").await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_up_skips_unit_without_up_script() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "1_first", Some("UP 1"), None);
        write_unit(dir.path(), "default", "2_draft", None, Some("DOWN 2"));
        write_unit(dir.path(), "default", "3_third", Some("UP 3"), None);
        let (migrator, ledger) = migrator(dir.path());

        let summary = migrator.up("default", 0).await.unwrap();

        assert_eq!(keys(&summary.processed), vec!["1_first", "3_third"]);
        assert_eq!(
            summary.skipped,
            vec![Skipped {
                migration: MigrationRef::new(2, "draft"),
                reason: SkipReason::MissingUpScript,
            }]
        );
        assert_eq!(ledger.applied_ids("default").await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_up_requires_target_directory() {
        let dir = TempDir::new().unwrap();
        let (migrator, ledger) = migrator(dir.path());

        let err = migrator.up("missing", 0).await.unwrap_err();
        assert!(matches!(err, KeelError::SourceNotFound(_)));
        assert!(ledger.executed_scripts().await.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_restores_applied_set() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "1_first", Some("UP 1"), Some("DOWN 1"));
        let (migrator, ledger) = migrator(dir.path());
        migrator.up("default", 0).await.unwrap();
        let before = ledger.applied_ids("default").await;

        write_unit(dir.path(), "default", "2_second", Some("UP 2"), Some("DOWN 2"));
        migrator.up("default", 0).await.unwrap();
        assert_eq!(ledger.applied_ids("default").await, vec![1, 2]);

        let summary = migrator.down("default", 1).await.unwrap();
        assert_eq!(keys(&summary.processed), vec!["2_second"]);
        assert_eq!(ledger.applied_ids("default").await, before);
    }

    #[tokio::test]
    async fn test_down_reverts_most_recent_first() {
        let dir = TempDir::new().unwrap();
        three_units(dir.path(), "default");
        let (migrator, ledger) = migrator(dir.path());
        migrator.up("default", 0).await.unwrap();

        let summary = migrator.down("default", 0).await.unwrap();

        assert_eq!(keys(&summary.processed), vec!["3_third", "2_second", "1_first"]);
        assert!(ledger.applied_ids("default").await.is_empty());
        let executed = ledger.executed_scripts().await;
        assert_eq!(&executed[3..], &["DOWN 3", "DOWN 2", "DOWN 1"]);
    }

    #[tokio::test]
    async fn test_down_skips_unit_without_down_script() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "1_first", Some("UP 1"), Some("DOWN 1"));
        write_unit(dir.path(), "default", "2_permanent", Some("UP 2"), None);
        let (migrator, ledger) = migrator(dir.path());
        migrator.up("default", 0).await.unwrap();

        let summary = migrator.down("default", 0).await.unwrap();

        assert_eq!(keys(&summary.processed), vec!["1_first"]);
        assert_eq!(summary.skipped[0].reason, SkipReason::MissingDownScript);
        assert_eq!(ledger.applied_ids("default").await, vec![2]);

        let rows = StatusReporter::new(MigrationSource::new(dir.path()), ledger.clone())
            .report("default")
            .await
            .unwrap();
        let permanent = rows.iter().find(|r| r.key() == "2_permanent").unwrap();
        assert!(permanent.on_disk && permanent.in_ledger);
        let first = rows.iter().find(|r| r.key() == "1_first").unwrap();
        assert!(first.on_disk && !first.in_ledger);
    }

    #[tokio::test]
    async fn test_down_with_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let (migrator, _ledger) = migrator(dir.path());

        let summary = migrator.down("default", 0).await.unwrap();
        assert!(summary.processed.is_empty());
        assert!(summary.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_down_skips_entries_without_directory() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "1_first", Some("UP 1"), Some("DOWN 1"));
        let (migrator, ledger) = migrator(dir.path());
        migrator.up("default", 0).await.unwrap();
        ledger.seed("default", 5, "pruned").await;

        let summary = migrator.down("default", 0).await.unwrap();

        assert_eq!(keys(&summary.processed), vec!["1_first"]);
        assert_eq!(
            summary.skipped[0],
            Skipped {
                migration: MigrationRef::new(5, "pruned"),
                reason: SkipReason::MissingDirectory,
            }
        );
        assert_eq!(ledger.applied_ids("default").await, vec![5]);
    }

    #[tokio::test]
    async fn test_down_finds_zero_padded_directory_by_id() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "0001_init", Some("UP 1"), Some("DOWN 1"));
        let (migrator, ledger) = migrator(dir.path());
        migrator.up("default", 0).await.unwrap();

        let summary = migrator.down("default", 0).await.unwrap();
        assert_eq!(keys(&summary.processed), vec!["1_init"]);
        assert!(ledger.applied_ids("default").await.is_empty());
    }

    #[tokio::test]
    async fn test_down_tolerates_unapplied_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "1_init", Some("UP 1"), Some("DOWN 1"));
        let (migrator, ledger) = migrator(dir.path());
        migrator.up("default", 0).await.unwrap();

        write_unit(dir.path(), "default", "2_a", Some("UP 2a"), Some("DOWN 2a"));
        write_unit(dir.path(), "default", "02_b", Some("UP 2b"), Some("DOWN 2b"));

        let summary = migrator.down("default", 0).await.unwrap();
        assert_eq!(keys(&summary.processed), vec!["1_init"]);
        assert!(ledger.applied_ids("default").await.is_empty());
    }

    #[tokio::test]
    async fn test_down_picks_duplicate_matching_recorded_name() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "2_a", Some("UP 2a"), Some("DOWN 2a"));
        write_unit(dir.path(), "default", "02_b", Some("UP 2b"), Some("DOWN 2b"));
        let (migrator, ledger) = migrator(dir.path());
        ledger.seed("default", 2, "b").await;

        let summary = migrator.down("default", 0).await.unwrap();
        assert_eq!(keys(&summary.processed), vec!["2_b"]);
        let executed = ledger.executed_scripts().await;
        assert_eq!(executed, vec!["DOWN 2b".to_string()]);
    }

    #[tokio::test]
    async fn test_down_rejects_ambiguous_directory() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "2_a", Some("UP 2a"), Some("DOWN 2a"));
        write_unit(dir.path(), "default", "02_a", Some("UP 2a"), Some("DOWN 2a"));
        let (migrator, ledger) = migrator(dir.path());
        ledger.seed("default", 2, "a").await;

        let err = migrator.down("default", 0).await.unwrap_err();
        assert!(matches!(err, KeelError::InvalidMigration(_)));
        assert_eq!(ledger.applied_ids("default").await, vec![2]);
        assert!(ledger.executed_scripts().await.is_empty());
    }

    #[tokio::test]
    async fn test_down_script_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "default", "1_first", Some("UP 1"), Some("DOWN 1"));
        write_unit(dir.path(), "default", "2_second", Some("UP 2"), Some("DOWN 2 FAIL"));
        write_unit(dir.path(), "default", "3_third", Some("UP 3"), Some("DOWN 3"));
        let (migrator, ledger) = migrator(dir.path());
        migrator.up("default", 0).await.unwrap();
        ledger.fail_scripts_containing("FAIL").await;

        let err = migrator.down("default", 0).await.unwrap_err();

        assert!(err.to_string().contains("2_second"));
        // 3 stays reverted, 2 failed and is still applied, 1 was never attempted.
        assert_eq!(ledger.applied_ids("default").await, vec![1, 2]);
        assert!(!ledger.executed_scripts().await.contains(&"DOWN 1".to_string()));
    }

    #[tokio::test]
    async fn test_down_ledger_delete_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        three_units(dir.path(), "default");
        let (migrator, ledger) = migrator(dir.path());
        migrator.up("default", 0).await.unwrap();
        ledger.fail_removals(true).await;

        let summary = migrator.down("default", 2).await.unwrap();

        // Both down-scripts ran, but the rows survive: the documented two-phase gap.
        assert_eq!(keys(&summary.processed), vec!["3_third", "2_second"]);
        assert_eq!(keys(&summary.ledger_failures), vec!["3_third", "2_second"]);
        assert!(summary.step_limit_reached);
        assert_eq!(ledger.applied_ids("default").await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_targets_do_not_interfere() {
        let dir = TempDir::new().unwrap();
        three_units(dir.path(), "tenant_a");
        write_unit(dir.path(), "tenant_b", "1_only", Some("UP B1"), Some("DOWN B1"));
        let (migrator, ledger) = migrator(dir.path());

        migrator.up("tenant_b", 0).await.unwrap();
        migrator.up("tenant_a", 0).await.unwrap();
        assert_eq!(ledger.applied_ids("tenant_a").await, vec![1, 2, 3]);
        assert_eq!(ledger.applied_ids("tenant_b").await, vec![1]);

        migrator.down("tenant_a", 0).await.unwrap();
        assert!(ledger.applied_ids("tenant_a").await.is_empty());
        assert_eq!(ledger.applied_ids("tenant_b").await, vec![1]);
    }
}
