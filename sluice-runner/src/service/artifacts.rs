//! Artifact collection
//!
//! After a job succeeds, each declared output is fetched from the job
//! workspace through the runner. A missing output is attached to the result
//! as a diagnostic and never changes its status.

use sluice_core::domain::job::{ArtifactRef, Diagnostic, JobResult, JobStatus};
use sluice_core::domain::log::{LogEntry, LogLevel, LogStream};
use sluice_core::domain::pipeline::is_path_component;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::job_runner::{JobRunner, RunHandle, workspace_path};

pub struct ArtifactCollector {
    runner: Arc<dyn JobRunner>,
    /// Artifacts are copied under `<dir>/<run_id>/<job>/<name>/` when set
    artifact_dir: Option<PathBuf>,
}

impl ArtifactCollector {
    pub fn new(runner: Arc<dyn JobRunner>, artifact_dir: Option<PathBuf>) -> Self {
        Self {
            runner,
            artifact_dir,
        }
    }

    /// Collects the declared outputs of a successful job into its result
    ///
    /// Does nothing unless the job succeeded. Cancelling the run stops
    /// collection; artifacts fetched so far are kept and the status is left
    /// as it is.
    ///
    /// # Arguments
    /// * `handle` - The dispatch whose workspace holds the outputs
    /// * `outputs` - Artifact name to workspace-relative path
    /// * `result` - The settled job result to attach artifacts to
    /// * `cancel` - The run's cancellation token
    ///
    /// # Returns
    /// Nothing; missing outputs are recorded as `MissingArtifact` diagnostics
    pub async fn collect(
        &self,
        handle: &RunHandle,
        outputs: &BTreeMap<String, String>,
        result: &mut JobResult,
        cancel: &CancellationToken,
    ) {
        if result.status != JobStatus::Success || outputs.is_empty() {
            return;
        }

        for (name, path) in outputs {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                fetched = self.runner.fetch_file(handle, path) => Some(fetched),
            };
            let Some(fetched) = fetched else {
                warn!("Artifact collection for job {} cancelled", handle.job);
                result.logs.push(LogEntry::new(
                    LogLevel::Warning,
                    LogStream::Executor,
                    "run was cancelled while collecting artifacts",
                ));
                break;
            };

            let bytes = match fetched {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "Artifact {} of job {} is missing: {}",
                        name, handle.job, e
                    );
                    result.diagnostics.push(Diagnostic::MissingArtifact {
                        name: name.clone(),
                        path: path.clone(),
                    });
                    continue;
                }
            };

            let stored_at = match self.store(handle, name, path, &bytes).await {
                Ok(stored_at) => stored_at,
                Err(e) => {
                    warn!("Failed to store artifact {} of job {}: {:#}", name, handle.job, e);
                    result.logs.push(LogEntry::new(
                        LogLevel::Warning,
                        LogStream::Executor,
                        format!("artifact {} was collected but could not be stored: {}", name, e),
                    ));
                    None
                }
            };

            debug!("Collected artifact {} ({} bytes)", name, bytes.len());
            result.artifacts.insert(
                name.clone(),
                ArtifactRef {
                    name: name.clone(),
                    path: path.clone(),
                    run_id: handle.run_id,
                    job: handle.job.clone(),
                    size_bytes: bytes.len() as u64,
                    stored_at,
                },
            );
        }

        info!(
            "Collected {}/{} artifact(s) for job {}",
            result.artifacts.len(),
            outputs.len(),
            handle.job
        );
    }

    async fn store(
        &self,
        handle: &RunHandle,
        name: &str,
        path: &str,
        bytes: &[u8],
    ) -> anyhow::Result<Option<PathBuf>> {
        let Some(base) = &self.artifact_dir else {
            return Ok(None);
        };
        for component in [handle.job.as_str(), name] {
            if !is_path_component(component) {
                anyhow::bail!("'{}' cannot be used as an artifact directory", component);
            }
        }

        let relative = workspace_path(path)?;
        let file_name = relative
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("artifact path '{}' has no file name", path))?;

        let dir = base
            .join(handle.run_id.to_string())
            .join(&handle.job)
            .join(name);
        tokio::fs::create_dir_all(&dir).await?;

        let target = dir.join(file_name);
        tokio::fs::write(&target, bytes).await?;
        Ok(Some(target))
    }
}
