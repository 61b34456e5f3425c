//! Job result types
//!
//! A `JobResult` is created PENDING when its stage is reached, owned by the
//! stage's execution path while it runs, and frozen once terminal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::condition::SkipReason;
use crate::domain::log::LogEntry;
use crate::error::RunError;

/// Job execution status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Skipped,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Skipped | JobStatus::Success | JobStatus::Failure | JobStatus::Cancelled
        )
    }

    /// Whether this status counts against the pipeline
    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Failure | JobStatus::Cancelled)
    }

    /// Allowed edges of the job state machine
    ///
    /// PENDING may terminate without running (skipped, unresolved params,
    /// cancelled before dispatch); RUNNING always ends in an outcome.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                next,
                JobStatus::Running | JobStatus::Skipped | JobStatus::Failure | JobStatus::Cancelled
            ),
            JobStatus::Running => matches!(
                next,
                JobStatus::Success | JobStatus::Failure | JobStatus::Cancelled
            ),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Skipped => "SKIPPED",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "SKIPPED" => Ok(JobStatus::Skipped),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILURE" => Ok(JobStatus::Failure),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Why a job ended the way it did
///
/// Every message is built from redacted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    #[error("MissingVariable: ${{{name}}} referenced by {field} is not defined")]
    MissingVariable { name: String, field: String },

    #[error("RunnerFault: {message}")]
    RunnerFault {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Timeout: job exceeded its {limit_ms}ms budget")]
    Timeout { limit_ms: u64 },

    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    #[error("MissingArtifact({name}): '{path}' was not produced")]
    MissingArtifact { name: String, path: String },

    #[error("ConditionUnsatisfied: {reason}")]
    ConditionUnsatisfied { reason: SkipReason },
}

impl Diagnostic {
    /// Failures that a scheduling-level retry may fix
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Diagnostic::RunnerFault { .. } | Diagnostic::Timeout { .. }
        )
    }
}

/// Reference to a collected output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    /// Path relative to the job workspace
    pub path: String,
    pub run_id: Uuid,
    pub job: String,
    pub size_bytes: u64,
    /// Copy kept outside the job workspace, when an artifact directory is configured
    pub stored_at: Option<PathBuf>,
}

/// Structured result printed by a pipeline tool on stdout
///
/// Tools report `{success, message, output_data, error_details}` as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReport {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub output_data: Option<serde_json::Value>,
    #[serde(default)]
    pub error_details: Option<String>,
}

impl ToolReport {
    /// Extracts a report from captured stdout
    ///
    /// Accepts the whole output being the JSON document or the document
    /// following earlier log lines. Returns `None` when no report is present.
    pub fn from_stdout(stdout: &str) -> Option<Self> {
        let trimmed = stdout.trim();
        if !trimmed.ends_with('}') {
            return None;
        }

        if let Ok(report) = serde_json::from_str(trimmed) {
            return Some(report);
        }

        // Last JSON object starting at the beginning of a line
        let mut offset = trimmed.len();
        while let Some(pos) = trimmed[..offset].rfind("\n{") {
            if let Ok(report) = serde_json::from_str(&trimmed[pos + 1..]) {
                return Some(report);
            }
            offset = pos;
        }

        None
    }
}

/// Result of a job within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: String,
    pub status: JobStatus,
    /// Resolved parameters with secure values replaced by a placeholder
    pub params: BTreeMap<String, String>,
    pub artifacts: BTreeMap<String, ArtifactRef>,
    pub exit_code: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
    /// Number of dispatches performed
    pub attempts: u32,
    pub logs: Vec<LogEntry>,
    pub report: Option<ToolReport>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl JobResult {
    pub fn pending(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            status: JobStatus::Pending,
            params: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            exit_code: None,
            diagnostics: Vec::new(),
            attempts: 0,
            logs: Vec::new(),
            report: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// A job whose condition rejected it
    pub fn skipped(job: impl Into<String>, reason: SkipReason) -> Self {
        let mut result = Self::pending(job);
        result.status = JobStatus::Skipped;
        result.finished_at = Some(chrono::Utc::now());
        result
            .diagnostics
            .push(Diagnostic::ConditionUnsatisfied { reason });
        result
    }

    /// Moves the job along the state machine
    pub fn transition(&mut self, next: JobStatus) -> Result<(), RunError> {
        if !self.status.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                job: self.job.clone(),
                from: self.status,
                to: next,
            });
        }

        let now = chrono::Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// User-facing summary of the job's diagnostics
    pub fn diagnostic(&self) -> Option<String> {
        if self.diagnostics.is_empty() {
            return None;
        }

        Some(
            self.diagnostics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
