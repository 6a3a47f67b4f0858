mod down;
mod new;
mod status;
mod up;

pub use down::DownCommand;
pub use new::NewCommand;
pub use status::StatusCommand;
pub use up::UpCommand;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use console::style;
use tracing::debug;

use keel::{KeelConfig, RunSummary};
use keel_runtime::migrations::SkipReason;

/// keel - ordered, per-target SQL migrations for PostgreSQL
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file path (optional).
    #[arg(short, long, default_value = "keel.toml", global = true)]
    pub config: PathBuf,

    /// PostgreSQL connection string.
    #[arg(long, env = "PGSTRING", hide_env_values = true, global = true)]
    pub database_url: Option<String>,

    /// Root directory containing one migration directory per target.
    #[arg(short, long, env = "KEEL_MIGRATIONS_DIR", global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Migration target (stream) to operate on.
    #[arg(short, long, env = "TARGET", global = true)]
    pub target: Option<String>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Load the config file if present, then apply flag/environment overrides.
    pub fn load_config(&self) -> Result<KeelConfig> {
        let mut config = if self.config.exists() {
            debug!("Loading configuration from {}", self.config.display());
            KeelConfig::from_file(&self.config)?
        } else {
            debug!(
                "No configuration file at {}, using defaults",
                self.config.display()
            );
            KeelConfig::default()
        };

        if let Some(url) = &self.database_url {
            config.database.url = Some(url.clone());
        }
        if let Some(dir) = &self.migrations_dir {
            config.migrations.root = dir.clone();
        }
        if let Some(target) = &self.target {
            config.migrations.target = target.clone();
        }

        config.migrations.check_target()?;
        Ok(config)
    }
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending migrations.
    Up(UpCommand),

    /// Roll back applied migrations, most recent first.
    Down(DownCommand),

    /// Show which migrations are on disk and which are applied.
    Status(StatusCommand),

    /// Create a new migration directory.
    New(NewCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let config = self.global.load_config()?;
        match self.command {
            Commands::Up(cmd) => cmd.execute(&config).await,
            Commands::Down(cmd) => cmd.execute(&config).await,
            Commands::Status(cmd) => cmd.execute(&config).await,
            Commands::New(cmd) => cmd.execute(&config),
        }
    }
}

/// Header printed before each command's output.
fn print_header(title: &str, config: &KeelConfig) {
    println!();
    println!(
        "  {}  {} ({})",
        style("keel").bold().cyan(),
        title,
        style(format!("target '{}'", config.migrations.target)).dim()
    );
    println!();
}

fn display_dir(path: &Path) -> String {
    path.display().to_string()
}

fn skip_reason(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::AlreadyApplied => "already applied",
        SkipReason::MissingUpScript => "no up.sql",
        SkipReason::MissingDownScript => "no down.sql",
        SkipReason::MissingDirectory => "directory not found",
    }
}

/// Print the outcome of an up/down run. `verb` names the processed action.
fn print_summary(summary: &RunSummary, verb: &str) {
    for migration in &summary.processed {
        println!("  {} {}: {}", style("✓").green(), verb, migration);
    }
    for skipped in &summary.skipped {
        if skipped.reason == SkipReason::AlreadyApplied {
            continue;
        }
        println!(
            "  {} Skipped {} ({})",
            style("○").yellow(),
            skipped.migration,
            skip_reason(skipped.reason)
        );
    }
    for migration in &summary.ledger_failures {
        println!(
            "  {} {} was rolled back but is still recorded as applied",
            style("✗").red(),
            migration
        );
    }

    println!();
    if summary.processed.is_empty() {
        println!("  {} Nothing to do", style("ℹ").blue());
    } else {
        println!(
            "  {} {} {} migration(s)",
            style("✓").green(),
            verb,
            summary.processed.len()
        );
    }
    if summary.step_limit_reached {
        println!("  {} Stopped at the step limit", style("ℹ").blue());
    }
    println!();
}
