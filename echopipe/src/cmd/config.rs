//! The `config` subcommand.

use std::{fmt::Display, str::FromStr};

use clap::Subcommand;
use echopipe_common::{
    prelude::*,
    rest_api::{Client, SettingsPatch},
    settings::Settings,
};
use prettytable::{format::consts::FORMAT_CLEAN, row, Table};

/// `config` options.
#[derive(Debug, Subcommand)]
pub enum Opt {
    /// Print the orchestrator's current configuration.
    #[command(name = "get")]
    Get,
    /// Update one or more fields, each given as `key=value`.
    #[command(name = "set")]
    Set {
        /// `key=value` pairs, e.g. `max_concurrent_tasks=5`.
        pairs: Vec<String>,
    },
}

/// Run the `config` subcommand.
pub async fn run(client: &Client, opt: &Opt) -> Result<()> {
    match opt {
        Opt::Get => {
            print_settings(&client.get_config().await?);
            Ok(())
        }
        Opt::Set { pairs } => {
            let patch = build_patch(pairs)?;
            print_settings(&client.update_config(&patch).await?);
            Ok(())
        }
    }
}

fn build_patch(pairs: &[String]) -> Result<SettingsPatch> {
    let mut patch = SettingsPatch::default();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("expected key=value, got {pair:?}"))?;
        apply_field(&mut patch, key, value)?;
    }
    Ok(patch)
}

fn apply_field(patch: &mut SettingsPatch, key: &str, value: &str) -> Result<()> {
    match key {
        "max_concurrent_tasks" => patch.max_concurrent_tasks = Some(parse_value(key, value)?),
        "max_transcription_calls" => patch.max_transcription_calls = Some(parse_value(key, value)?),
        "max_api_calls" => patch.max_api_calls = Some(parse_value(key, value)?),
        "task_queue_max_size" => patch.task_queue_max_size = Some(parse_value(key, value)?),
        "queue_check_interval_sec" => patch.queue_check_interval_sec = Some(parse_value(key, value)?),
        "transcription_timeout_sec" => patch.transcription_timeout_sec = Some(parse_value(key, value)?),
        "api_timeout_sec" => patch.api_timeout_sec = Some(parse_value(key, value)?),
        "api_max_retries" => patch.api_max_retries = Some(parse_value(key, value)?),
        "auth_max_retries" => patch.auth_max_retries = Some(parse_value(key, value)?),
        "max_polling_attempts" => patch.max_polling_attempts = Some(parse_value(key, value)?),
        "polling_interval_sec" => patch.polling_interval_sec = Some(parse_value(key, value)?),
        "pool_stop_timeout_sec" => patch.pool_stop_timeout_sec = Some(parse_value(key, value)?),
        "max_file_size_bytes" => patch.max_file_size_bytes = Some(parse_value(key, value)?),
        other => return Err(format_err!("unknown or non-editable config key {other:?}")),
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: Display,
{
    value
        .parse()
        .map_err(|err| format_err!("invalid value {value:?} for {key}: {err}"))
}

fn print_settings(settings: &Settings) {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row!["KEY", "VALUE"]);
    table.add_row(row!["max_concurrent_tasks", settings.max_concurrent_tasks]);
    table.add_row(row!["max_transcription_calls", settings.max_transcription_calls]);
    table.add_row(row!["max_api_calls", settings.max_api_calls]);
    table.add_row(row!["task_queue_max_size", settings.task_queue_max_size]);
    table.add_row(row!["queue_check_interval_sec", settings.queue_check_interval_sec]);
    table.add_row(row!["transcription_timeout_sec", settings.transcription_timeout_sec]);
    table.add_row(row!["api_timeout_sec", settings.api_timeout_sec]);
    table.add_row(row!["api_max_retries", settings.api_max_retries]);
    table.add_row(row!["auth_max_retries", settings.auth_max_retries]);
    table.add_row(row!["max_polling_attempts", settings.max_polling_attempts]);
    table.add_row(row!["polling_interval_sec", settings.polling_interval_sec]);
    table.add_row(row!["pool_stop_timeout_sec", settings.pool_stop_timeout_sec]);
    table.add_row(row!["max_file_size_bytes", settings.max_file_size_bytes]);
    table.printstd();
}
