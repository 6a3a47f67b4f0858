use anyhow::Result;
use clap::Parser;
use console::style;

use keel::{KeelConfig, MigrationSource, StatusReporter, StatusRow};

use super::print_header;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Compare migrations on disk with the ledger.
#[derive(Parser, Debug)]
pub struct StatusCommand {
    /// Print rows as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(self, config: &KeelConfig) -> Result<()> {
        let target = &config.migrations.target;
        let source = MigrationSource::new(&config.migrations.root);

        let (db, ledger) = keel::connect(config).await?;
        let result = StatusReporter::new(source, ledger).report(target).await;
        db.close().await;
        let rows = result?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }

        print_header("Migration status", config);
        print!("{}", render_table(&rows));
        println!();

        let pending = rows.iter().filter(|r| r.is_pending()).count();
        let applied = rows.iter().filter(|r| r.in_ledger).count();
        println!(
            "  {} {} applied, {} pending",
            style("ℹ").blue(),
            applied,
            pending
        );
        println!();
        Ok(())
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Plain-text table with columns ID, NAME, DISK, DB, APPLIED AT.
pub(crate) fn render_table(rows: &[StatusRow]) -> String {
    let cells: Vec<[String; 5]> = rows
        .iter()
        .map(|row| {
            [
                row.id.to_string(),
                row.name.clone(),
                yes_no(row.on_disk).to_string(),
                yes_no(row.in_ledger).to_string(),
                row.applied_at
                    .map(|at| at.format(TIMESTAMP_FORMAT).to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    let headers = ["ID", "NAME", "DISK", "DB", "APPLIED AT"];
    let mut widths = headers.map(str::len);
    for line in &cells {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.len());
        }
    }

    let format_line = |line: &[&str]| {
        let padded: Vec<String> = line
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        format!("  {}\n", padded.join(" | ").trim_end())
    };

    let mut out = format_line(&headers);
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&format!("  {}\n", separator.join("-+-")));
    for line in &cells {
        let refs: Vec<&str> = line.iter().map(String::as_str).collect();
        out.push_str(&format_line(&refs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_table() {
        let rows = vec![
            StatusRow {
                id: 1,
                name: "init".into(),
                on_disk: true,
                in_ledger: true,
                applied_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
            },
            StatusRow {
                id: 2,
                name: "add_users".into(),
                on_disk: true,
                in_ledger: false,
                applied_at: None,
            },
        ];

        let table = render_table(&rows);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("ID | NAME"));
        assert!(lines[0].ends_with("APPLIED AT"));
        assert!(lines[1].trim_start().starts_with("--"));
        assert!(lines[2].contains("init"));
        assert!(lines[2].contains("yes  | yes"));
        assert!(lines[2].ends_with("2024-03-01 12:30:00"));
        assert!(lines[3].contains("add_users"));
        assert!(lines[3].contains("yes  | no"));
        assert!(lines[3].ends_with("-"));
    }

    #[test]
    fn test_render_empty_table_has_header() {
        let table = render_table(&[]);
        assert_eq!(table.lines().count(), 2);
    }
}
