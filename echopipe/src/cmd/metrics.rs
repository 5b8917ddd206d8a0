//! The `metrics` subcommand.

use clap::Subcommand;
use echopipe_common::{prelude::*, rest_api::Client};
use prettytable::{format::consts::FORMAT_CLEAN, row, Table};

/// `metrics` options.
#[derive(Debug, Subcommand)]
pub enum Opt {
    /// Session and all-time processed/failed counts.
    #[command(name = "summary")]
    Summary,
    /// All records for a single calendar day (`YYYY-MM-DD`).
    #[command(name = "day")]
    Day {
        /// The day to query, as `YYYY-MM-DD`.
        date: String,
    },
    /// Records from the trailing N calendar days.
    #[command(name = "recent")]
    Recent {
        /// Number of trailing days to include.
        days: u32,
    },
    /// Case-insensitive substring search over filenames.
    #[command(name = "search")]
    Search {
        /// Substring to match against filenames.
        pattern: String,
    },
}

/// Run the `metrics` subcommand.
pub async fn run(client: &Client, opt: &Opt) -> Result<()> {
    match opt {
        Opt::Summary => {
            let summary = client.metrics_summary().await?;
            let mut table = Table::new();
            table.set_format(*FORMAT_CLEAN);
            table.add_row(row!["", "PROCESSED", "FAILED"]);
            table.add_row(row!["session", summary.session.processed, summary.session.failed]);
            table.add_row(row!["all-time", summary.all_time.processed, summary.all_time.failed]);
            table.printstd();
            Ok(())
        }
        Opt::Day { date } => print_files(client.metrics_day(date).await?),
        Opt::Recent { days } => print_files(client.metrics_recent(*days).await?),
        Opt::Search { pattern } => print_files(client.metrics_search(pattern).await?),
    }
}

fn print_files(files: Vec<FileMetric>) -> Result<()> {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row!["FILENAME", "TIMESTAMP", "STATUS", "DURATION_SEC", "SIZE_BYTES", "ERROR"]);
    for file in files {
        table.add_row(row![
            &file.filename,
            file.timestamp,
            format!("{:?}", file.status),
            file.duration_sec,
            file.size_bytes,
            file.error.as_deref().unwrap_or("")
        ]);
    }
    table.printstd();
    Ok(())
}
