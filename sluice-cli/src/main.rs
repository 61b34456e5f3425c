//! Sluice CLI
//!
//! Runs and validates `CiPipeline` documents against a local container
//! runtime.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::{Config, OutputFormat};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice CI pipeline executor", long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, env = "SLUICE_FORMAT", default_value = "text")]
    format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "sluice=info,sluice_runner=info",
        1 => "sluice=debug,sluice_runner=debug,sluice_core=debug",
        _ => "sluice=trace,sluice_runner=trace,sluice_core=trace",
    };

    // Logs go to stderr so JSON output stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config { format: cli.format };

    handle_command(cli.command, &config).await
}
