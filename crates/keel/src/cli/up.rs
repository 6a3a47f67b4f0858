use anyhow::Result;
use clap::Parser;
use console::style;

use keel::{KeelConfig, MigrationSource, Migrator};

use super::{display_dir, print_header, print_summary};

/// Apply pending migrations in ascending id order.
#[derive(Parser, Debug)]
pub struct UpCommand {
    /// Maximum number of migrations to apply (0 = all).
    #[arg(short, long, env = "STEPS", default_value_t = 0)]
    pub steps: usize,
}

impl UpCommand {
    pub async fn execute(self, config: &KeelConfig) -> Result<()> {
        let target = &config.migrations.target;
        let source = MigrationSource::new(&config.migrations.root);
        let units = source.list_units(target)?;

        print_header("Apply migrations", config);
        if units.is_empty() {
            println!(
                "  {} No migrations found in {}",
                style("ℹ").blue(),
                display_dir(&source.target_dir(target))
            );
            println!();
            return Ok(());
        }

        let (db, ledger) = keel::connect(config).await?;
        println!(
            "  {} Applying to {}...",
            style("→").dim(),
            style(db.description()).cyan()
        );
        println!();

        let result = Migrator::new(source, ledger).up(target, self.steps).await;
        db.close().await;

        print_summary(&result?, "Applied");
        Ok(())
    }
}
