//! Output formatting: table (`tabled`) or JSON, selected per the global
//! `--output` flag.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_str(value: &str) -> Self {
        match value {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

pub fn print_rows<T: Tabled + Serialize>(rows: Vec<T>, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No results found".yellow());
            } else {
                println!("{}", tabled::Table::new(rows));
            }
        }
    }
    Ok(())
}

pub fn print_single<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Table => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

/// A steady-ticking spinner for install/wait-ready style operations that
/// have no incremental progress to report, only a final outcome.
pub fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    bar
}

pub fn success(message: &str) {
    println!("{} {}", "\u{2713}".green().bold(), message.green());
}

pub fn warn(message: &str) {
    println!("{} {}", "\u{26a0}".yellow().bold(), message.yellow());
}

pub fn error(message: &str) {
    eprintln!("{} {}", "\u{2717}".red().bold(), message.red());
}
