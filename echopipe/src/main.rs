#![deny(unsafe_code)]

use clap::{Parser, Subcommand};
use echopipe_common::{prelude::*, rest_api::Client, tracing_support::initialize_tracing};

mod cmd;

/// Command-line options, parsed using `clap`.
#[derive(Debug, Parser)]
#[command(about = "A command-line client for the echopipe orchestrator's HTTP control surface.")]
struct Opt {
    /// Base URL of the `echopipe-orchestrator` HTTP Adapter.
    #[arg(long, env = "ECHOPIPE_URL", default_value = "http://localhost:8080/")]
    url: String,

    #[command(subcommand)]
    cmd: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Print the orchestrator's running state and metric counts.
    #[command(name = "status")]
    Status,

    /// Bring the watcher and worker pool up.
    #[command(name = "start")]
    Start,

    /// Stop the watcher and drain the worker pool.
    #[command(name = "stop")]
    Stop,

    /// Pause processing without stopping the pool.
    #[command(name = "pause")]
    Pause,

    /// Resume a paused pipeline.
    #[command(name = "resume")]
    Resume,

    /// Stop and start the orchestrator.
    #[command(name = "restart")]
    Restart,

    /// Drain and rebuild the worker pool in place, re-reading current config.
    #[command(name = "restart-worker-pool")]
    RestartWorkerPool,

    /// Configuration-related commands.
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        cmd: cmd::config::Opt,
    },

    /// Metrics-related commands.
    #[command(name = "metrics")]
    Metrics {
        #[command(subcommand)]
        cmd: cmd::metrics::Opt,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let opt = Opt::parse();
    debug!("Args: {:?}", opt);
    let client = Client::new(&opt.url)?;

    match &opt.cmd {
        Command::Status => cmd::status::run(&client).await,
        Command::Start => {
            client.start().await?;
            println!("started");
            Ok(())
        }
        Command::Stop => {
            client.stop().await?;
            println!("stopped");
            Ok(())
        }
        Command::Pause => {
            client.pause().await?;
            println!("paused");
            Ok(())
        }
        Command::Resume => {
            client.resume().await?;
            println!("resumed");
            Ok(())
        }
        Command::Restart => {
            client.restart().await?;
            println!("restarted");
            Ok(())
        }
        Command::RestartWorkerPool => {
            client.restart_worker_pool().await?;
            println!("worker pool restarted");
            Ok(())
        }
        Command::Config { cmd } => cmd::config::run(&client, cmd).await,
        Command::Metrics { cmd } => cmd::metrics::run(&client, cmd).await,
    }
}
