use anyhow::Result;
use clap::Parser;
use console::style;

use keel::{KeelConfig, MigrationSource, Migrator};

use super::{print_header, print_summary};

/// Roll back applied migrations, newest first.
#[derive(Parser, Debug)]
pub struct DownCommand {
    /// Maximum number of migrations to roll back (0 = all).
    #[arg(short, long, env = "STEPS", default_value_t = 0)]
    pub steps: usize,
}

impl DownCommand {
    pub async fn execute(self, config: &KeelConfig) -> Result<()> {
        let target = &config.migrations.target;
        let source = MigrationSource::new(&config.migrations.root);

        print_header("Roll back migrations", config);

        let (db, ledger) = keel::connect(config).await?;
        println!(
            "  {} Rolling back on {}...",
            style("→").dim(),
            style(db.description()).cyan()
        );
        println!();

        let result = Migrator::new(source, ledger).down(target, self.steps).await;
        db.close().await;

        // Ledger-delete failures are reported but do not fail the command.
        print_summary(&result?, "Rolled back");
        Ok(())
    }
}
