//! Condition evaluation
//!
//! Decides whether a stage's job runs from its `when` clause, the terminal
//! status of the previous stage and the run's trigger. Evaluation is pure:
//! the same clause and context always give the same answer.
//!
//! A stage that fails its condition is SKIPPED, never FAILED.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::job::JobStatus;
use crate::domain::pipeline::When;
use crate::domain::run::TriggerContext;

/// What a condition is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionContext<'a> {
    /// Terminal status of the previous stage, `None` for the first stage
    pub previous: Option<JobStatus>,
    pub branch: Option<&'a str>,
    pub manual: bool,
}

impl<'a> ConditionContext<'a> {
    pub fn new(previous: Option<JobStatus>, trigger: &'a TriggerContext) -> Self {
        Self {
            previous,
            branch: trigger.branch.as_deref(),
            manual: trigger.manual,
        }
    }

    /// The status the filter compares against; a pipeline starts green
    pub fn effective_previous(&self) -> JobStatus {
        self.previous.unwrap_or(JobStatus::Success)
    }
}

/// Which axis of a `when` clause rejected a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "axis", rename_all = "snake_case")]
pub enum SkipReason {
    Status { previous: JobStatus },
    Branch { branch: Option<String> },
    ManualOnly,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Status { previous } => {
                write!(f, "previous stage status {} is not accepted", previous)
            }
            SkipReason::Branch { branch: Some(branch) } => {
                write!(f, "branch '{}' is not in the allow-list", branch)
            }
            SkipReason::Branch { branch: None } => {
                write!(f, "branch is unknown and the stage is branch-restricted")
            }
            SkipReason::ManualOnly => write!(f, "stage only runs on manual triggers"),
        }
    }
}

/// Returns whether the stage should run
pub fn evaluate(when: &When, context: &ConditionContext<'_>) -> bool {
    check(when, context).is_ok()
}

/// Like [`evaluate`], reporting the first axis that rejected the stage
///
/// Axes are checked in the order status, branch, manual.
pub fn check(when: &When, context: &ConditionContext<'_>) -> Result<(), SkipReason> {
    let previous = context.effective_previous();
    if !when.statuses.accepts(previous) {
        return Err(SkipReason::Status { previous });
    }

    if let Some(branches) = &when.branches {
        let allowed = context
            .branch
            .is_some_and(|branch| branches.iter().any(|b| b == branch));
        if !allowed {
            return Err(SkipReason::Branch {
                branch: context.branch.map(str::to_string),
            });
        }
    }

    // manual: false does not exclude manual runs
    if when.manual == Some(true) && !context.manual {
        return Err(SkipReason::ManualOnly);
    }

    Ok(())
}
