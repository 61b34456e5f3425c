//! Job runner interface
//!
//! The seam between the executor and whatever actually runs a job's
//! container. The executor only needs four things from it: run a command to
//! completion, stop a running command, read a file the job produced, and
//! free the job's workspace afterwards.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Identifies one dispatch of a job
///
/// Each attempt gets a fresh handle, so a retried job never reuses the
/// workspace of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunHandle {
    pub id: Uuid,
    pub run_id: Uuid,
    pub job: String,
}

impl RunHandle {
    pub fn new(run_id: Uuid, job: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            job: job.into(),
        }
    }
}

/// What to run
#[derive(Clone)]
pub struct RunSpec {
    /// Container image reference
    pub image: String,
    pub command: String,
    /// Environment for the command; may hold secure values
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl fmt::Debug for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunSpec")
            .field("image", &self.image)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn exited(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start job: {0}")]
    Spawn(String),

    #[error("runner I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{0}' not found in job workspace")]
    NotFound(String),

    #[error("'{0}' is not a path inside the job workspace")]
    InvalidPath(String),
}

/// Executes job containers
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Runs the command to completion and captures its output
    ///
    /// Timeouts are enforced by the caller; `spec.timeout` is informational.
    async fn run(&self, handle: &RunHandle, spec: &RunSpec) -> Result<RunOutput, RunnerError>;

    /// Stops a running command; a no-op when it already finished
    async fn cancel(&self, handle: &RunHandle) -> Result<(), RunnerError>;

    /// Reads a file from the job workspace
    async fn fetch_file(&self, handle: &RunHandle, path: &str) -> Result<Vec<u8>, RunnerError>;

    /// Frees the job workspace once outputs have been collected
    async fn release(&self, _handle: &RunHandle) -> Result<(), RunnerError> {
        Ok(())
    }
}

/// Normalizes a declared output path, rejecting anything that could leave
/// the workspace
pub fn workspace_path(path: &str) -> Result<PathBuf, RunnerError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(RunnerError::InvalidPath(path.to_string()));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RunnerError::InvalidPath(path.to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(RunnerError::InvalidPath(path.to_string()));
    }
    Ok(normalized)
}
