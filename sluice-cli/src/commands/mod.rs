//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod run;
mod validate;

pub use run::RunArgs;
pub use validate::ValidateArgs;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use sluice_core::domain::job::JobStatus;
use std::process::ExitCode;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Execute a pipeline document
    Run(RunArgs),
    /// Check a pipeline document without running it
    Validate(ValidateArgs),
}

/// Routes the command to its handler
///
/// # Arguments
/// * `command` - The parsed subcommand
/// * `config` - Global CLI options
///
/// # Returns
/// The process exit code, or an error that aborted the command
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Run(args) => run::handle_run_command(args, config).await,
        Commands::Validate(args) => validate::handle_validate_command(args, config),
    }
}

/// Colorize job status for display
fn colorize_status(status: JobStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::Pending => status_str.dimmed(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Success => status_str.green(),
        JobStatus::Failure => status_str.red(),
        JobStatus::Skipped => status_str.yellow(),
        JobStatus::Cancelled => status_str.magenta(),
    }
}
