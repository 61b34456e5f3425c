//! Error types for the core crate

use thiserror::Error;

use crate::domain::job::JobStatus;
use crate::domain::run::RunStatus;

/// A pipeline model that breaks the executor's invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("pipeline '{0}' declares no stages")]
    NoStages(String),

    #[error("stage '{stage}' references unknown job '{job}'")]
    UnknownJob { stage: String, job: String },

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("{0} name cannot be empty")]
    EmptyName(&'static str),

    #[error("job stored under '{key}' is named '{name}'")]
    JobNameMismatch { key: String, name: String },

    #[error("job '{job}' has an empty '{field}'")]
    MissingField { job: String, field: &'static str },

    #[error("{kind} name '{name}' must be a single path component")]
    UnsafeName { kind: &'static str, name: String },
}

/// Failure to build a job invocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("variable '{name}' referenced by {field} is not defined")]
    MissingVariable { name: String, field: String },
}

/// Violation of the run or job state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("run is {actual}, expected {expected}")]
    InvalidRunState {
        expected: RunStatus,
        actual: RunStatus,
    },

    #[error("run already finished with status {0}")]
    Terminated(RunStatus),

    #[error("stage '{stage}' published with non-terminal status {status}")]
    NotTerminal { stage: String, status: JobStatus },

    #[error("run recorded {recorded} of {expected} stages")]
    Incomplete { recorded: usize, expected: usize },

    #[error("job '{job}' cannot move from {from} to {to}")]
    InvalidTransition {
        job: String,
        from: JobStatus,
        to: JobStatus,
    },
}
