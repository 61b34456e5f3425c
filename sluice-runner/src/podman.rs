//! Podman job runner
//!
//! Runs each job in a fresh container of its image:
//! - a host workspace directory per dispatch, mounted at `/workspace`
//! - the job command run through `/bin/sh -c`, whatever the image entrypoint
//! - environment passed by name so values never appear on the command line
//! - outputs read back from the host workspace, which is removed on release
//!
//! Works with any runtime that accepts podman's CLI (`docker` included).

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::service::job_runner::{
    JobRunner, RunHandle, RunOutput, RunSpec, RunnerError, workspace_path,
};

/// Mount point of the job workspace inside the container
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Exit code the runtime uses for its own failures (image pull, bad flags)
const RUNTIME_ERROR_EXIT_CODE: i32 = 125;

/// Checks that the container runtime is installed and answers
pub async fn check_runtime_available(runtime: &str) -> Result<String> {
    let output = Command::new(runtime)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("Failed to execute '{} --version'. Is it installed?", runtime))?;

    if !output.status.success() {
        anyhow::bail!("{} is not working correctly", runtime);
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    info!("Container runtime is available: {}", version);
    Ok(version)
}

pub struct PodmanRunner {
    runtime: String,
    workspace_base: PathBuf,
}

impl PodmanRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            runtime: config.container_runtime.clone(),
            workspace_base: config.workspace_base.clone(),
        }
    }

    /// Host directory backing a dispatch's `/workspace`
    pub fn workspace(&self, handle: &RunHandle) -> PathBuf {
        self.workspace_base
            .join(handle.run_id.to_string())
            .join(handle.id.to_string())
    }

    fn container_name(handle: &RunHandle) -> String {
        format!("sluice-{}", handle.id)
    }

    fn run_args(&self, handle: &RunHandle, spec: &RunSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            Self::container_name(handle),
            "-v".to_string(),
            format!("{}:{}", self.workspace(handle).display(), CONTAINER_WORKSPACE),
            "-w".to_string(),
            CONTAINER_WORKSPACE.to_string(),
        ];
        for key in spec.env.keys() {
            args.push("-e".to_string());
            args.push(key.clone());
        }
        args.extend([
            "--entrypoint".to_string(),
            "/bin/sh".to_string(),
            spec.image.clone(),
            "-c".to_string(),
            spec.command.clone(),
        ]);
        args
    }
}

#[async_trait]
impl JobRunner for PodmanRunner {
    async fn run(&self, handle: &RunHandle, spec: &RunSpec) -> Result<RunOutput, RunnerError> {
        let workspace = self.workspace(handle);
        tokio::fs::create_dir_all(&workspace).await?;

        info!(
            "Starting container {} from image {}",
            Self::container_name(handle),
            spec.image
        );

        let output = Command::new(&self.runtime)
            .args(self.run_args(handle, spec))
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RunnerError::Spawn(format!("failed to execute {}: {}", self.runtime, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        if exit_code == Some(RUNTIME_ERROR_EXIT_CODE) {
            return Err(RunnerError::Spawn(format!(
                "{} could not start image {}: {}",
                self.runtime,
                spec.image,
                stderr.trim()
            )));
        }

        debug!(
            "Container {} exited: exit_code={:?}, stdout_len={}, stderr_len={}",
            Self::container_name(handle),
            exit_code,
            stdout.len(),
            stderr.len()
        );

        Ok(RunOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), RunnerError> {
        let name = Self::container_name(handle);
        info!("Stopping container {}", name);

        let output = Command::new(&self.runtime)
            .args(["rm", "-f", &name])
            .output()
            .await?;

        if !output.status.success() {
            // Already gone when the job finished on its own
            debug!(
                "Container {} not removed: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn fetch_file(&self, handle: &RunHandle, path: &str) -> Result<Vec<u8>, RunnerError> {
        let full = self.workspace(handle).join(workspace_path(path)?);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RunnerError::NotFound(path.to_string()))
            }
            Err(e) => Err(RunnerError::Io(e)),
        }
    }

    async fn release(&self, handle: &RunHandle) -> Result<(), RunnerError> {
        let workspace = self.workspace(handle);
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {
                debug!("Removed workspace {}", workspace.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to remove workspace {}: {}", workspace.display(), e);
                Err(RunnerError::Io(e))
            }
        }
    }
}
