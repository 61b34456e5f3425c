//! Job dispatcher
//!
//! Runs one resolved job through the job runner. The runner call lives in its
//! own task so a timeout or a pipeline cancellation can stop it while the
//! dispatcher stays responsive.

use sluice_core::domain::job::{Diagnostic, JobResult, JobStatus};
use sluice_core::domain::log::LogLevel;
use sluice_core::error::RunError;
use sluice_core::params::Invocation;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::execution::ExecutionOutcome;
use crate::service::job_runner::{JobRunner, RunHandle, RunOutput, RunSpec, RunnerError};
use crate::service::log_buffer::InMemoryLogBuffer;

pub struct Dispatcher {
    runner: Arc<dyn JobRunner>,
    default_timeout: Duration,
    log_capacity: usize,
}

enum Wake {
    Finished(Result<Result<RunOutput, RunnerError>, tokio::task::JoinError>),
    TimedOut,
    Cancelled,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, config: &Config) -> Self {
        Self {
            runner,
            default_timeout: config.default_job_timeout,
            log_capacity: config.log_buffer_size,
        }
    }

    /// Executes one attempt of a job and returns its terminal result
    ///
    /// `extra_env` is added to the invocation's environment. A job reached
    /// after cancellation is never started and comes back CANCELLED.
    ///
    /// # Arguments
    /// * `handle` - Identity of this attempt
    /// * `invocation` - The resolved job input, secrets included
    /// * `extra_env` - Run-level variables such as `SLUICE_RUN_ID`
    /// * `cancel` - The run's cancellation token
    ///
    /// # Returns
    /// A SUCCESS, FAILURE or CANCELLED job result with redacted logs
    pub async fn dispatch(
        &self,
        handle: &RunHandle,
        invocation: &Invocation,
        extra_env: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<JobResult, RunError> {
        let mut result = JobResult::pending(&invocation.job);
        result.params = invocation.snapshot();

        if cancel.is_cancelled() {
            result.diagnostics.push(Diagnostic::Cancelled {
                message: "run was cancelled before the job started".to_string(),
            });
            result.transition(JobStatus::Cancelled)?;
            return Ok(result);
        }

        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        let mut env = invocation.environment();
        env.extend(extra_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        let spec = RunSpec {
            image: invocation.path.clone(),
            command: invocation.command.clone(),
            env,
            timeout,
        };

        let logs = InMemoryLogBuffer::new(self.log_capacity, invocation.mask.clone());
        logs.executor(
            LogLevel::Info,
            format!(
                "Running '{}' in {}",
                invocation.redacted_command(),
                invocation.path
            ),
        );

        result.transition(JobStatus::Running)?;
        info!(
            "Dispatching job {} ({}) with timeout {:?}",
            handle.job, handle.id, timeout
        );
        debug!("Job {} command: {}", handle.job, invocation.redacted_command());

        let runner = Arc::clone(&self.runner);
        let task_handle = handle.clone();
        let mut task = tokio::spawn(async move { runner.run(&task_handle, &spec).await });

        let wake = tokio::select! {
            biased;
            joined = &mut task => Wake::Finished(joined),
            _ = cancel.cancelled() => Wake::Cancelled,
            _ = tokio::time::sleep(timeout) => Wake::TimedOut,
        };

        let outcome = match wake {
            Wake::Finished(Ok(Ok(output))) => {
                debug!("Job {} exited with {:?}", handle.job, output.exit_code);
                ExecutionOutcome::Exited(output)
            }
            Wake::Finished(Ok(Err(e))) => {
                let message = invocation.mask.redact(&e.to_string());
                warn!("Runner failed job {}: {}", handle.job, message);
                ExecutionOutcome::Fault(message)
            }
            Wake::Finished(Err(e)) => {
                warn!("Job task for {} failed: {}", handle.job, e);
                ExecutionOutcome::Fault(format!("job task failed: {}", e))
            }
            Wake::TimedOut => {
                warn!("Job {} timed out after {:?}", handle.job, timeout);
                self.stop(handle, task).await;
                ExecutionOutcome::TimedOut(timeout)
            }
            Wake::Cancelled => {
                warn!("Cancelling job {}", handle.job);
                self.stop(handle, task).await;
                ExecutionOutcome::Cancelled
            }
        };

        let result = outcome.into_job_result(result, &invocation.mask, &logs)?;
        info!("Job {} finished with status {}", handle.job, result.status);
        Ok(result)
    }

    /// Asks the runner to stop the job, then drops the waiting task
    async fn stop(&self, handle: &RunHandle, task: JoinHandle<Result<RunOutput, RunnerError>>) {
        if let Err(e) = self.runner.cancel(handle).await {
            warn!("Failed to cancel job {}: {}", handle.job, e);
        }
        task.abort();
        let _ = task.await;
    }
}
