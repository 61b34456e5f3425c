//! Status aggregation
//!
//! Folds the terminal stage results of a run into the pipeline outcome:
//! - FAILURE when a stage failed (or was cancelled) and no later stage whose
//!   condition admits failure ran to SUCCESS after it
//! - SUCCESS when every stage succeeded
//! - PARTIAL otherwise: stages were skipped, or failures were recovered

use crate::domain::job::JobStatus;
use crate::domain::pipeline::Pipeline;
use crate::domain::run::{RunStatus, StageResult};

/// Computes the overall status of a finished run
pub fn aggregate(pipeline: &Pipeline, stages: &[StageResult]) -> RunStatus {
    if stages.iter().any(|stage| !stage.status.is_terminal()) {
        return RunStatus::Running;
    }

    let unrecovered = stages
        .iter()
        .enumerate()
        .filter(|(_, stage)| stage.status.is_failure())
        .any(|(idx, _)| !is_recovered(pipeline, stages, idx));

    if unrecovered {
        return RunStatus::Failure;
    }

    if stages
        .iter()
        .all(|stage| stage.status == JobStatus::Success)
    {
        RunStatus::Success
    } else {
        RunStatus::Partial
    }
}

/// A failure is recovered by a later successful stage that was allowed to
/// run after failures
fn is_recovered(pipeline: &Pipeline, stages: &[StageResult], failed_idx: usize) -> bool {
    stages[failed_idx + 1..].iter().any(|later| {
        later.status == JobStatus::Success && admits_failure(pipeline, &later.stage)
    })
}

fn admits_failure(pipeline: &Pipeline, stage_name: &str) -> bool {
    pipeline
        .stages
        .iter()
        .find(|stage| stage.name == stage_name)
        .and_then(|stage| pipeline.jobs.get(&stage.job))
        .is_some_and(|job| job.condition().statuses.admits_failure())
}

/// Counts of stage outcomes, for summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn from_stages(stages: &[StageResult]) -> Self {
        stages.iter().fold(Self::default(), |mut counts, stage| {
            match stage.status {
                JobStatus::Success => counts.succeeded += 1,
                JobStatus::Failure => counts.failed += 1,
                JobStatus::Skipped => counts.skipped += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
                JobStatus::Pending | JobStatus::Running => {}
            }
            counts
        })
    }
}
