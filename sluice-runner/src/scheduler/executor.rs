//! Pipeline executor
//!
//! Walks a pipeline's stages in declared order and drives each one through
//! condition evaluation, parameter resolution, dispatch (with retries) and
//! artifact collection. Every stage result is published to the run once it
//! is terminal, and its status is what the next stage's condition sees.

use sluice_core::condition::{self, ConditionContext};
use sluice_core::domain::job::{Diagnostic, JobResult, JobStatus};
use sluice_core::domain::log::{LogEntry, LogLevel, LogStream};
use sluice_core::domain::pipeline::{Pipeline, Stage};
use sluice_core::domain::run::{Run, StageResult, TriggerContext};
use sluice_core::error::{ModelError, ResolveError, RunError};
use sluice_core::params;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::RunContext;
use crate::scheduler::plan;
use crate::service::{ArtifactCollector, Dispatcher, JobRunner};

/// Errors that abort a run
///
/// Job-level failures never surface here; they are recorded on the run.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid pipeline: {0}")]
    Model(#[from] ModelError),

    #[error("run state violation: {0}")]
    Run(#[from] RunError),

    #[error("stage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Executes pipelines against a job runner
pub struct PipelineExecutor {
    config: Config,
    stages: StageExecutor,
    cancel: CancellationToken,
}

/// Per-stage work, cloned into stage tasks in parallel mode
#[derive(Clone)]
struct StageExecutor {
    runner: Arc<dyn JobRunner>,
    dispatcher: Arc<Dispatcher>,
    collector: Arc<ArtifactCollector>,
}

impl PipelineExecutor {
    pub fn new(config: Config, runner: Arc<dyn JobRunner>) -> Self {
        let stages = StageExecutor {
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&runner), &config)),
            collector: Arc::new(ArtifactCollector::new(
                Arc::clone(&runner),
                config.artifact_dir.clone(),
            )),
            runner,
        };

        Self {
            config,
            stages,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels every run of this executor
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs a pipeline to completion
    ///
    /// `overrides` are merged over the pipeline's vars once, before the
    /// first stage.
    pub async fn execute(
        &self,
        pipeline: Arc<Pipeline>,
        trigger: TriggerContext,
        overrides: HashMap<String, String>,
    ) -> Result<Run, ExecutorError> {
        pipeline.validate()?;

        let mut run = Run::new(&pipeline, trigger.clone());
        let context = RunContext::new(
            run.id,
            Arc::clone(&pipeline),
            trigger,
            overrides,
            self.cancel.clone(),
        );

        run.start()?;
        info!(
            "Starting run {} of pipeline {} ({} stage(s))",
            run.id,
            pipeline.id,
            pipeline.stages.len()
        );

        for batch in plan::batches(&pipeline, self.config.parallel) {
            let previous = run.last_status();
            let results = if batch.len() == 1 {
                let stage = &pipeline.stages[batch[0]];
                vec![self.stages.run_stage(&context, stage, previous).await?]
            } else {
                self.run_batch(&context, &batch, previous).await?
            };

            for result in results {
                debug!("Stage {} finished with {}", result.stage, result.status);
                run.record(result)?;
            }
        }

        let status = run.finish(&pipeline)?;
        info!("Run {} finished with status {}", run.id, status);
        Ok(run)
    }

    /// Runs a batch of independent stages concurrently
    ///
    /// Results come back in declared order.
    async fn run_batch(
        &self,
        context: &RunContext,
        batch: &[usize],
        previous: Option<JobStatus>,
    ) -> Result<Vec<StageResult>, ExecutorError> {
        info!("Running {} stage(s) concurrently", batch.len());
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_jobs));

        let mut handles = Vec::with_capacity(batch.len());
        for &idx in batch {
            let stages = self.stages.clone();
            let context = context.clone();
            let stage = context.pipeline.stages[idx].clone();
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                // Permit is released when dropped
                let _permit = semaphore.acquire_owned().await.ok();
                stages.run_stage(&context, &stage, previous).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await??);
        }
        Ok(results)
    }
}

impl StageExecutor {
    async fn run_stage(
        &self,
        context: &RunContext,
        stage: &Stage,
        previous: Option<JobStatus>,
    ) -> Result<StageResult, ExecutorError> {
        let job = context.pipeline.job_for(stage)?;

        if context.cancel.is_cancelled() {
            info!("Skipping stage {}: run was cancelled", stage.name);
            let mut result = JobResult::pending(&job.name);
            result.diagnostics.push(Diagnostic::Cancelled {
                message: "run was cancelled before the stage started".to_string(),
            });
            result.transition(JobStatus::Skipped)?;
            return Ok(StageResult::new(&stage.name, result));
        }

        let condition_context = ConditionContext::new(previous, &context.trigger);
        if let Err(reason) = condition::check(&job.condition(), &condition_context) {
            info!("Skipping stage {}: {}", stage.name, reason);
            return Ok(StageResult::new(
                &stage.name,
                JobResult::skipped(&job.name, reason),
            ));
        }

        let invocation = match params::resolve(job, &context.vars) {
            Ok(invocation) => invocation,
            Err(ResolveError::MissingVariable { name, field }) => {
                warn!(
                    "Stage {} failed: variable {} referenced by {} is not defined",
                    stage.name, name, field
                );
                let mut result = JobResult::pending(&job.name);
                result
                    .diagnostics
                    .push(Diagnostic::MissingVariable { name, field });
                result.transition(JobStatus::Failure)?;
                return Ok(StageResult::new(&stage.name, result));
            }
        };

        let env = context.job_env(&job.name);
        let max_attempts = job.retries.saturating_add(1);
        let mut earlier_logs: Vec<LogEntry> = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let handle = context.handle(&job.name);

            let mut result = self
                .dispatcher
                .dispatch(&handle, &invocation, &env, &context.cancel)
                .await?;
            result.attempts = attempt;

            self.collector
                .collect(&handle, &job.outputs, &mut result, &context.cancel)
                .await;
            if let Err(e) = self.runner.release(&handle).await {
                warn!("Failed to release workspace of job {}: {}", job.name, e);
            }

            let retry = result.status == JobStatus::Failure
                && attempt < max_attempts
                && !context.cancel.is_cancelled()
                && result.diagnostics.iter().any(Diagnostic::is_retryable);

            if !retry {
                if !earlier_logs.is_empty() {
                    earlier_logs.append(&mut result.logs);
                    result.logs = earlier_logs;
                }
                return Ok(StageResult::new(&stage.name, result));
            }

            let reason = result.diagnostic().unwrap_or_default();
            warn!(
                "Job {} failed on attempt {}/{}, retrying: {}",
                job.name, attempt, max_attempts, reason
            );
            earlier_logs.append(&mut result.logs);
            earlier_logs.push(LogEntry::new(
                LogLevel::Warning,
                LogStream::Executor,
                format!(
                    "attempt {}/{} failed: {}; retrying",
                    attempt, max_attempts, reason
                ),
            ));
        }
    }
}
