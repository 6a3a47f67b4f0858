//! On-disk migration discovery.
//!
//! Layout: `<root>/<target>/<id>_<name>/{up.sql,down.sql}`.

use std::path::{Path, PathBuf};

use keel_core::error::{KeelError, Result, ScriptKind};
use keel_core::migration::MigrationRef;
use tracing::{debug, info, warn};

/// A migration directory discovered for a target.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    target: String,
    migration: MigrationRef,
    path: PathBuf,
    up: Option<PathBuf>,
    down: Option<PathBuf>,
}

impl MigrationUnit {
    fn from_dir(target: &str, migration: MigrationRef, path: PathBuf) -> Self {
        let script = |kind: ScriptKind| {
            let p = path.join(kind.file_name());
            p.is_file().then_some(p)
        };
        let up = script(ScriptKind::Up);
        let down = script(ScriptKind::Down);

        Self {
            target: target.to_string(),
            migration,
            path,
            up,
            down,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn id(&self) -> i64 {
        self.migration.id
    }

    pub fn name(&self) -> &str {
        &self.migration.name
    }

    pub fn migration(&self) -> &MigrationRef {
        &self.migration
    }

    /// Directory holding the unit's scripts.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_up(&self) -> bool {
        self.up.is_some()
    }

    pub fn has_down(&self) -> bool {
        self.down.is_some()
    }

    /// Read `up.sql`.
    pub fn read_up(&self) -> Result<String> {
        self.read_script(ScriptKind::Up)
    }

    /// Read `down.sql`.
    pub fn read_down(&self) -> Result<String> {
        self.read_script(ScriptKind::Down)
    }

    fn read_script(&self, kind: ScriptKind) -> Result<String> {
        let path = match kind {
            ScriptKind::Up => self.up.as_ref(),
            ScriptKind::Down => self.down.as_ref(),
        };

        match path {
            Some(path) => Ok(std::fs::read_to_string(path)?),
            None => Err(KeelError::MissingScript {
                target: self.target.clone(),
                migration: self.migration.key(),
                script: kind,
            }),
        }
    }
}

impl std::fmt::Display for MigrationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.migration)
    }
}

/// Reads migration units from a directory tree with one subdirectory per target.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    root: PathBuf,
}

impl MigrationSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a target's migrations.
    pub fn target_dir(&self, target: &str) -> PathBuf {
        self.root.join(target)
    }

    /// Units of a target in ascending id order.
    ///
    /// Fails with [`KeelError::SourceNotFound`] when the target directory is
    /// missing and with [`KeelError::InvalidMigration`] on duplicate ids.
    pub fn list_units(&self, target: &str) -> Result<Vec<MigrationUnit>> {
        match self.scan(target)? {
            Some(units) => ensure_unique_ids(target, units),
            None => Err(KeelError::SourceNotFound(self.target_dir(target))),
        }
    }

    /// Like [`list_units`](Self::list_units), but a missing target directory
    /// yields no units.
    pub fn list_units_if_present(&self, target: &str) -> Result<Vec<MigrationUnit>> {
        ensure_unique_ids(target, self.scan(target)?.unwrap_or_default())
    }

    /// Every numbered directory of a target, duplicates included.
    ///
    /// Used for reporting, where a broken tree should still be shown.
    pub fn inventory(&self, target: &str) -> Result<Vec<MigrationUnit>> {
        Ok(self.scan(target)?.unwrap_or_default())
    }

    /// The directory a ledger entry was applied from, `<target>/{id}_{name}`,
    /// if it still exists.
    pub fn historical_unit(&self, target: &str, migration: &MigrationRef) -> Option<MigrationUnit> {
        let path = self.target_dir(target).join(migration.key());
        path.is_dir()
            .then(|| MigrationUnit::from_dir(target, migration.clone(), path))
    }

    /// Scaffold a new migration directory with empty up/down scripts.
    ///
    /// The id is one past the highest existing id of the target.
    pub fn create_unit(&self, target: &str, name: &str) -> Result<MigrationUnit> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(KeelError::InvalidMigration(format!(
                "Migration name '{}' may only contain letters, digits, '_' and '-'",
                name
            )));
        }

        let existing = self.list_units_if_present(target)?;
        let next_id = existing.last().map(|u| u.id() + 1).unwrap_or(1);
        let migration = MigrationRef::new(next_id, name);
        let path = self.target_dir(target).join(migration.key());

        std::fs::create_dir_all(&path)?;
        for kind in [ScriptKind::Up, ScriptKind::Down] {
            let header = format!("-- {} ({}) for target '{}'\n", migration, kind, target);
            std::fs::write(path.join(kind.file_name()), header)?;
        }

        info!("Created migration {} at {}", migration, path.display());
        Ok(MigrationUnit::from_dir(target, migration, path))
    }

    /// `None` when the target directory does not exist.
    fn scan(&self, target: &str) -> Result<Option<Vec<MigrationUnit>>> {
        let dir = self.target_dir(target);
        if !dir.is_dir() {
            debug!("Migration directory does not exist: {}", dir.display());
            return Ok(None);
        }

        let mut units = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let dir_name = entry.file_name();
            let Some(dir_name) = dir_name.to_str() else {
                warn!("Ignoring migration directory with non UTF-8 name: {}", path.display());
                continue;
            };

            match MigrationRef::parse_dir_name(dir_name) {
                Some(migration) => units.push(MigrationUnit::from_dir(target, migration, path)),
                None => warn!(
                    "Ignoring directory without a numeric migration id: {}",
                    path.display()
                ),
            }
        }

        units.sort_by(|a, b| a.id().cmp(&b.id()).then_with(|| a.path.cmp(&b.path)));
        debug!("Found {} migrations for target '{}'", units.len(), target);
        Ok(Some(units))
    }
}

fn ensure_unique_ids(target: &str, units: Vec<MigrationUnit>) -> Result<Vec<MigrationUnit>> {
    if let Some(pair) = units.windows(2).find(|pair| pair[0].id() == pair[1].id()) {
        return Err(KeelError::InvalidMigration(format!(
            "Duplicate migration id {} in target '{}': {} and {}",
            pair[0].id(),
            target,
            pair[0].path.display(),
            pair[1].path.display()
        )));
    }
    Ok(units)
}
