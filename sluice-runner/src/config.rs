//! Executor configuration
//!
//! Defines the tunables of a pipeline run: default job timeout, parallelism,
//! where job workspaces and collected artifacts live, and which container
//! runtime executes jobs.

use std::path::PathBuf;
use std::time::Duration;

/// Executor configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout applied to jobs that do not declare their own
    pub default_job_timeout: Duration,

    /// Upper bound on jobs running at the same time in parallel mode
    pub max_parallel_jobs: usize,

    /// Run independent stages concurrently
    pub parallel: bool,

    /// Host directory under which job workspaces are created
    pub workspace_base: PathBuf,

    /// Where collected artifacts are copied; kept in place when unset
    pub artifact_dir: Option<PathBuf>,

    /// Container runtime binary (`podman` or `docker`)
    pub container_runtime: String,

    /// Maximum number of log lines kept per job
    pub log_buffer_size: usize,
}

impl Config {
    pub fn new() -> Self {
        Self {
            default_job_timeout: Duration::from_secs(600), // 10 minutes
            max_parallel_jobs: 4,
            parallel: false,
            workspace_base: std::env::temp_dir().join("sluice"),
            artifact_dir: None,
            container_runtime: "podman".to_string(),
            log_buffer_size: 1000,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to the default:
    /// - SLUICE_JOB_TIMEOUT (seconds, default: 600)
    /// - SLUICE_MAX_PARALLEL_JOBS (default: 4)
    /// - SLUICE_WORKSPACE_BASE (default: `$TMPDIR/sluice`)
    /// - SLUICE_ARTIFACT_DIR (default: unset)
    /// - SLUICE_CONTAINER_RUNTIME (default: podman)
    /// - SLUICE_LOG_BUFFER_SIZE (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::new();

        let default_job_timeout = std::env::var("SLUICE_JOB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_job_timeout);

        let max_parallel_jobs = std::env::var("SLUICE_MAX_PARALLEL_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_parallel_jobs);

        let workspace_base = std::env::var("SLUICE_WORKSPACE_BASE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_base);

        let artifact_dir = std::env::var("SLUICE_ARTIFACT_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let container_runtime = std::env::var("SLUICE_CONTAINER_RUNTIME")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.container_runtime);

        let log_buffer_size = std::env::var("SLUICE_LOG_BUFFER_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.log_buffer_size);

        Self {
            default_job_timeout,
            max_parallel_jobs,
            parallel: false,
            workspace_base,
            artifact_dir,
            container_runtime,
            log_buffer_size,
        }
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.default_job_timeout = timeout;
        self
    }

    pub fn with_parallel(mut self, max_parallel_jobs: usize) -> Self {
        self.parallel = true;
        self.max_parallel_jobs = max_parallel_jobs;
        self
    }

    pub fn with_workspace_base(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_base = path.into();
        self
    }

    pub fn with_artifact_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(path.into());
        self
    }

    pub fn with_container_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.container_runtime = runtime.into();
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_job_timeout.is_zero() {
            anyhow::bail!("default_job_timeout must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.log_buffer_size == 0 {
            anyhow::bail!("log_buffer_size must be greater than 0");
        }

        if self.container_runtime.trim().is_empty() {
            anyhow::bail!("container_runtime cannot be empty");
        }

        if self.workspace_base.as_os_str().is_empty() {
            anyhow::bail!("workspace_base cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
