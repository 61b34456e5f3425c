//! Validate command handler

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use sluice_core::domain::pipeline::{Pipeline, StatusFilter};
use sluice_core::dto::pipeline as document;
use sluice_core::params::REDACTED;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::{Config, OutputFormat};

#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the pipeline document
    file: PathBuf,
}

pub fn handle_validate_command(args: ValidateArgs, config: &Config) -> Result<ExitCode> {
    let pipeline = document::load(&args.file)
        .with_context(|| format!("Invalid pipeline document {}", args.file.display()))?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&redacted(pipeline))?)
        }
        OutputFormat::Text => print_pipeline(&pipeline),
    }

    Ok(ExitCode::SUCCESS)
}

/// Secure values written literally in the document are not echoed back
fn redacted(mut pipeline: Pipeline) -> Pipeline {
    for job in pipeline.jobs.values_mut() {
        for value in job.secure_params.values_mut() {
            *value = REDACTED.to_string();
        }
    }
    pipeline
}

fn print_pipeline(pipeline: &Pipeline) {
    println!("{}", "✓ Pipeline is valid".green().bold());
    println!("  ID:     {}", pipeline.id.cyan());
    println!("  Name:   {}", pipeline.name.bold());
    println!("  Stages: {}", pipeline.stages.len());

    for stage in &pipeline.stages {
        let Some(job) = pipeline.jobs.get(&stage.job) else {
            continue;
        };
        let when = job.condition();
        let statuses = match &when.statuses {
            StatusFilter::Any => "ANY".to_string(),
            StatusFilter::Only(set) => set
                .iter()
                .map(|status| status.as_str())
                .collect::<Vec<_>>()
                .join("|"),
        };

        println!(
            "    - {} {} {}",
            stage.name.cyan(),
            format!("({})", job.name).dimmed(),
            format!("on {}", statuses).dimmed()
        );
        if let Some(branches) = &when.branches {
            println!("        branches: {}", branches.join(", ").dimmed());
        }
        if when.manual == Some(true) {
            println!("        {}", "manual only".dimmed());
        }
        if !job.secure_params.is_empty() {
            let keys: Vec<&str> = job.secure_params.keys().map(String::as_str).collect();
            println!("        secure: {}", keys.join(", ").dimmed());
        }
        if !job.outputs.is_empty() {
            let names: Vec<&str> = job.outputs.keys().map(String::as_str).collect();
            println!("        outputs: {}", names.join(", ").dimmed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::pipeline::Job;

    #[test]
    fn test_json_output_hides_secure_values() {
        let pipeline = Pipeline::new("p", "P").with_stage(
            "notify",
            Job::new("notify", "img", "send")
                .with_param("TO", "team@example.com")
                .with_secure_param("TOKEN", "literal-token"),
        );

        let json = serde_json::to_string(&redacted(pipeline)).unwrap();
        assert!(!json.contains("literal-token"));
        assert!(json.contains("team@example.com"));
    }
}
