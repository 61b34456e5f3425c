//! Run domain types
//!
//! A `Run` is one execution of a pipeline. Its state machine is
//! `NOT_STARTED -> RUNNING -> {SUCCESS, FAILURE, PARTIAL}`; once terminal,
//! nothing can be recorded or re-run.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::job::{JobResult, JobStatus};
use crate::domain::pipeline::Pipeline;
use crate::error::RunError;
use crate::status;

/// How a run was started
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Branch being built, if known
    pub branch: Option<String>,
    /// Whether a person started the run by hand
    pub manual: bool,
    /// Who or what started the run
    pub actor: Option<String>,
}

impl TriggerContext {
    pub fn on_branch(branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..Self::default()
        }
    }

    pub fn manual(mut self, actor: impl Into<String>) -> Self {
        self.manual = true;
        self.actor = Some(actor.into());
        self
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    NotStarted,
    Running,
    Success,
    Failure,
    Partial,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Partial
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::NotStarted => "NOT_STARTED",
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
            RunStatus::Partial => "PARTIAL",
        };
        f.write_str(s)
    }
}

/// Outcome of one stage (exactly one job)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub status: JobStatus,
    pub job: JobResult,
}

impl StageResult {
    pub fn new(stage: impl Into<String>, job: JobResult) -> Self {
        Self {
            stage: stage.into(),
            status: job.status,
            job,
        }
    }
}

/// A single execution of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub trigger: TriggerContext,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Run {
    pub fn new(pipeline: &Pipeline, trigger: TriggerContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline.id.clone(),
            pipeline_name: pipeline.name.clone(),
            trigger,
            status: RunStatus::NotStarted,
            stages: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) -> Result<(), RunError> {
        if self.status != RunStatus::NotStarted {
            return Err(RunError::InvalidRunState {
                expected: RunStatus::NotStarted,
                actual: self.status,
            });
        }
        self.status = RunStatus::Running;
        self.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Terminal status of the most recently recorded stage
    pub fn last_status(&self) -> Option<JobStatus> {
        self.stages.last().map(|stage| stage.status)
    }

    /// Publishes a terminal stage result
    pub fn record(&mut self, result: StageResult) -> Result<(), RunError> {
        if self.status.is_terminal() {
            return Err(RunError::Terminated(self.status));
        }
        if self.status != RunStatus::Running {
            return Err(RunError::InvalidRunState {
                expected: RunStatus::Running,
                actual: self.status,
            });
        }
        if !result.status.is_terminal() {
            return Err(RunError::NotTerminal {
                stage: result.stage,
                status: result.status,
            });
        }
        self.stages.push(result);
        Ok(())
    }

    /// Computes and freezes the overall status
    pub fn finish(&mut self, pipeline: &Pipeline) -> Result<RunStatus, RunError> {
        if self.status.is_terminal() {
            return Err(RunError::Terminated(self.status));
        }
        if self.status != RunStatus::Running {
            return Err(RunError::InvalidRunState {
                expected: RunStatus::Running,
                actual: self.status,
            });
        }
        if self.stages.len() != pipeline.stages.len() {
            return Err(RunError::Incomplete {
                recorded: self.stages.len(),
                expected: pipeline.stages.len(),
            });
        }

        self.status = status::aggregate(pipeline, &self.stages);
        self.finished_at = Some(chrono::Utc::now());
        Ok(self.status)
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|stage| stage.stage == name)
    }
}
