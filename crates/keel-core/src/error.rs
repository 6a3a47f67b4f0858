use std::path::PathBuf;

use thiserror::Error;

/// Which script of a migration unit an operation needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Up,
    Down,
}

impl ScriptKind {
    /// File name of the script inside a migration directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ScriptKind::Up => "up.sql",
            ScriptKind::Down => "down.sql",
        }
    }
}

impl std::fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Core error type for keel operations.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migration directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    #[error("No {script} found for migration {migration} (target '{target}')")]
    MissingScript {
        target: String,
        migration: String,
        script: ScriptKind,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Migration {migration} failed for target '{target}': {source}")]
    Migration {
        target: String,
        migration: String,
        #[source]
        source: Box<KeelError>,
    },
}

impl KeelError {
    /// Attach target and migration context to an error raised while running a unit.
    pub fn in_migration(
        self,
        target: impl Into<String>,
        migration: impl std::fmt::Display,
    ) -> Self {
        KeelError::Migration {
            target: target.into(),
            migration: migration.to_string(),
            source: Box::new(self),
        }
    }

    /// Whether this error only means a script file was absent.
    pub fn is_missing_script(&self) -> bool {
        matches!(self, KeelError::MissingScript { .. })
    }
}

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_context_in_message() {
        let err = KeelError::Script("relation \"users\" already exists".into())
            .in_migration("tenant_a", "2_add_users");

        let msg = err.to_string();
        assert!(msg.contains("2_add_users"));
        assert!(msg.contains("tenant_a"));
        assert!(msg.contains("already exists"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_missing_script_message() {
        let err = KeelError::MissingScript {
            target: "default".into(),
            migration: "3_drop_col".into(),
            script: ScriptKind::Down,
        };
        assert!(err.is_missing_script());
        assert_eq!(
            err.to_string(),
            "No down.sql found for migration 3_drop_col (target 'default')"
        );
    }
}
