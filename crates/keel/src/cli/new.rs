use anyhow::Result;
use clap::Parser;
use console::style;

use keel::{KeelConfig, MigrationSource};

use super::{display_dir, print_header};

/// Create a new migration directory with empty up and down scripts.
#[derive(Parser, Debug)]
pub struct NewCommand {
    /// Migration name (letters, digits, `_` and `-`).
    pub name: String,
}

impl NewCommand {
    pub fn execute(self, config: &KeelConfig) -> Result<()> {
        let target = &config.migrations.target;
        let source = MigrationSource::new(&config.migrations.root);
        let unit = source.create_unit(target, &self.name)?;

        print_header("New migration", config);
        println!(
            "  {} Created {}",
            style("✓").green(),
            style(unit.migration()).cyan()
        );
        println!("    {}", style(display_dir(unit.path())).dim());
        println!();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_creates_unit_under_target() {
        let dir = TempDir::new().unwrap();
        let mut config = KeelConfig::default();
        config.migrations.root = dir.path().to_path_buf();
        config.migrations.target = "tenant".into();

        NewCommand {
            name: "add_users".into(),
        }
        .execute(&config)
        .unwrap();

        let unit = dir.path().join("tenant").join("1_add_users");
        assert!(unit.join("up.sql").is_file());
        assert!(unit.join("down.sql").is_file());
    }

    #[test]
    fn test_new_rejects_bad_name() {
        let dir = TempDir::new().unwrap();
        let mut config = KeelConfig::default();
        config.migrations.root = dir.path().to_path_buf();

        let result = NewCommand {
            name: "bad name".into(),
        }
        .execute(&config);
        assert!(result.is_err());
    }
}
