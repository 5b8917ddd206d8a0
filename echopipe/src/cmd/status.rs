//! The `status` subcommand.

use echopipe_common::{prelude::*, rest_api::Client};
use prettytable::{format::consts::FORMAT_CLEAN, row, Table};

/// Print the orchestrator's current running state and metric counts.
pub async fn run(client: &Client) -> Result<()> {
    let status = client.status().await?;

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row!["RUNNING", "PAUSED", "WORKERS", "SEEN", "QUEUE_FULL_EVENTS"]);
    table.add_row(row![
        status.running,
        status.paused,
        status.worker_count,
        status.seen_count,
        status.queue_full_events
    ]);
    table.printstd();

    println!();
    let mut metrics = Table::new();
    metrics.set_format(*FORMAT_CLEAN);
    metrics.add_row(row!["", "PROCESSED", "FAILED"]);
    metrics.add_row(row![
        "session",
        status.metrics.session.processed,
        status.metrics.session.failed
    ]);
    metrics.add_row(row![
        "all-time",
        status.metrics.all_time.processed,
        status.metrics.all_time.failed
    ]);
    metrics.printstd();

    Ok(())
}
