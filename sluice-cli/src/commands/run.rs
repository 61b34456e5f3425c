//! Run command handler
//!
//! Loads a pipeline document, executes it on the local container runtime and
//! prints the outcome. The process exits non-zero when the run FAILED.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use sluice_core::domain::job::JobResult;
use sluice_core::domain::log::{LogEntry, LogLevel};
use sluice_core::domain::run::{Run, RunStatus, TriggerContext};
use sluice_core::dto::pipeline as document;
use sluice_core::dto::run::RunSummary;
use sluice_runner::podman::check_runtime_available;
use sluice_runner::{Config as RunnerConfig, PipelineExecutor, PodmanRunner};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::colorize_status;
use crate::config::{Config, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Path to the pipeline document
    file: PathBuf,

    /// Branch being built, checked against `when.branches`
    #[arg(short, long, env = "SLUICE_BRANCH")]
    branch: Option<String>,

    /// Mark the run as manually triggered
    #[arg(long)]
    manual: bool,

    /// Who started the run
    #[arg(long, env = "SLUICE_ACTOR")]
    actor: Option<String>,

    /// Override a pipeline variable (KEY=value, repeatable)
    #[arg(long = "var", value_parser = parse_key_val)]
    vars: Vec<(String, String)>,

    /// Import a pipeline variable from the environment (repeatable)
    #[arg(long = "env")]
    env_vars: Vec<String>,

    /// Default job timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Run independent stages concurrently
    #[arg(long)]
    parallel: bool,

    /// Maximum concurrent jobs in parallel mode
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Container runtime binary
    #[arg(long)]
    runtime: Option<String>,

    /// Directory collected artifacts are copied to
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Directory job workspaces are created under
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Print captured job output
    #[arg(long)]
    logs: bool,
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].trim();
    if key.is_empty() {
        anyhow::bail!("invalid KEY=value: empty key in `{}`", s);
    }
    Ok((key.to_string(), s[pos + 1..].to_string()))
}

pub async fn handle_run_command(args: RunArgs, config: &Config) -> Result<ExitCode> {
    let pipeline = document::load(&args.file)
        .with_context(|| format!("Failed to load pipeline from {}", args.file.display()))?;

    let runner_config = runner_config(&args)?;
    check_runtime_available(&runner_config.container_runtime).await?;

    let overrides = overrides(&args)?;
    let trigger = TriggerContext {
        branch: args.branch.clone(),
        manual: args.manual,
        actor: args.actor.clone(),
    };

    let runner = Arc::new(PodmanRunner::new(&runner_config));
    let executor = PipelineExecutor::new(runner_config, runner);

    let cancel = executor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    info!("Running pipeline {} from {}", pipeline.id, args.file.display());
    let run = executor
        .execute(Arc::new(pipeline), trigger, overrides)
        .await
        .context("Pipeline execution aborted")?;

    match config.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&run)?),
        OutputFormat::Text => print_run(&run, args.logs),
    }

    Ok(exit_code(run.status))
}

/// Layers command-line flags over the environment configuration
fn runner_config(args: &RunArgs) -> Result<RunnerConfig> {
    let mut config = RunnerConfig::from_env();

    if let Some(secs) = args.timeout {
        config = config.with_job_timeout(Duration::from_secs(secs));
    }
    if args.parallel {
        let max = args.max_parallel.unwrap_or(config.max_parallel_jobs);
        config = config.with_parallel(max);
    } else if let Some(max) = args.max_parallel {
        config.max_parallel_jobs = max;
    }
    if let Some(runtime) = &args.runtime {
        config = config.with_container_runtime(runtime.clone());
    }
    if let Some(dir) = &args.artifact_dir {
        config = config.with_artifact_dir(dir.clone());
    }
    if let Some(dir) = &args.workspace {
        config = config.with_workspace_base(dir.clone());
    }

    config.validate().context("Invalid executor configuration")?;
    Ok(config)
}

fn overrides(args: &RunArgs) -> Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for name in &args.env_vars {
        let value = std::env::var(name)
            .with_context(|| format!("Environment variable {} is not set", name))?;
        overrides.insert(name.clone(), value);
    }
    // Explicit --var wins over imported environment
    overrides.extend(args.vars.iter().cloned());
    Ok(overrides)
}

fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Failure => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

fn print_run(run: &Run, with_logs: bool) {
    let summary = RunSummary::from(run);

    println!(
        "{} {} {}",
        "Run".bold(),
        summary.run_id.to_string().cyan(),
        format!("({})", summary.pipeline_name).dimmed()
    );
    println!();

    for (stage, result) in summary.stages.iter().zip(&run.stages) {
        println!(
            "  {} {:<20} {:<10} {}",
            "▸".cyan(),
            stage.stage.bold(),
            colorize_status(stage.status),
            stage.job.dimmed()
        );
        if stage.attempts > 1 {
            println!("      Attempts: {}", stage.attempts);
        }
        if let Some(message) = &stage.message {
            println!("      {}", message);
        }
        if let Some(diagnostic) = &stage.diagnostic {
            println!("      {}", diagnostic.dimmed());
        }
        for (name, location) in &stage.artifacts {
            println!("      {} {} → {}", "⤷".dimmed(), name.cyan(), location);
        }
        if with_logs {
            print_logs(&result.job);
        }
    }

    println!();
    let status = match summary.status {
        RunStatus::Success => format!("✓ {}", summary.status).green().bold(),
        RunStatus::Partial => format!("◐ {}", summary.status).yellow().bold(),
        _ => format!("✗ {}", summary.status).red().bold(),
    };
    let duration = summary
        .duration_ms
        .map(|ms| format!(" in {:.1}s", ms as f64 / 1000.0))
        .unwrap_or_default();
    println!(
        "{}  {} succeeded, {} failed, {} skipped, {} cancelled{}",
        status,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.cancelled,
        duration.dimmed()
    );
}

fn print_logs(job: &JobResult) {
    for entry in &job.logs {
        print_log_entry(entry);
    }
}

fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "        {} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}
