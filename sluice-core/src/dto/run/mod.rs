use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::job::JobStatus;
use crate::domain::run::{Run, RunStatus, StageResult};
use crate::status::StatusCounts;

/// Run outcome as shown to users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub duration_ms: Option<i64>,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub job: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub attempts: u32,
    pub diagnostic: Option<String>,
    pub message: Option<String>,
    /// Artifact name to the path it was collected from, or stored at
    pub artifacts: BTreeMap<String, String>,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        let counts = StatusCounts::from_stages(&run.stages);
        let duration_ms = run
            .started_at
            .zip(run.finished_at)
            .map(|(start, end)| (end - start).num_milliseconds());

        Self {
            run_id: run.id,
            pipeline_id: run.pipeline_id.clone(),
            pipeline_name: run.pipeline_name.clone(),
            status: run.status,
            succeeded: counts.succeeded,
            failed: counts.failed,
            skipped: counts.skipped,
            cancelled: counts.cancelled,
            duration_ms,
            stages: run.stages.iter().map(StageSummary::from).collect(),
        }
    }
}

impl From<&StageResult> for StageSummary {
    fn from(stage: &StageResult) -> Self {
        let artifacts = stage
            .job
            .artifacts
            .iter()
            .map(|(name, artifact)| {
                let location = artifact
                    .stored_at
                    .as_ref()
                    .map(|path: &PathBuf| path.display().to_string())
                    .unwrap_or_else(|| artifact.path.clone());
                (name.clone(), location)
            })
            .collect();

        Self {
            stage: stage.stage.clone(),
            job: stage.job.job.clone(),
            status: stage.status,
            exit_code: stage.job.exit_code,
            attempts: stage.job.attempts,
            diagnostic: stage.job.diagnostic(),
            message: stage.job.report.as_ref().map(|report| report.message.clone()),
            artifacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::SkipReason;
    use crate::domain::job::{ArtifactRef, JobResult};
    use crate::domain::pipeline::{Job, Pipeline};
    use crate::domain::run::TriggerContext;

    #[test]
    fn test_summary_from_finished_run() {
        let pipeline = Pipeline::new("notifications", "Notifications")
            .with_stage("notify", Job::new("send-email-notification", "img", "send"))
            .with_stage("report", Job::new("send-report", "img", "report"));
        let mut run = Run::new(&pipeline, TriggerContext::on_branch("main"));
        run.start().unwrap();

        let mut notify = JobResult::pending("send-email-notification");
        notify.transition(JobStatus::Running).unwrap();
        notify.transition(JobStatus::Success).unwrap();
        notify.exit_code = Some(0);
        notify.attempts = 1;
        notify.artifacts.insert(
            "LOG".to_string(),
            ArtifactRef {
                name: "LOG".to_string(),
                path: "mail.log".to_string(),
                run_id: run.id,
                job: "send-email-notification".to_string(),
                size_bytes: 12,
                stored_at: None,
            },
        );
        run.record(StageResult::new("notify", notify)).unwrap();

        let report = JobResult::skipped("send-report", SkipReason::ManualOnly);
        run.record(StageResult::new("report", report)).unwrap();
        run.finish(&pipeline).unwrap();

        let summary = RunSummary::from(&run);
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert!(summary.duration_ms.is_some());

        assert_eq!(summary.stages[0].artifacts["LOG"], "mail.log");
        assert_eq!(summary.stages[1].status, JobStatus::Skipped);
        assert!(
            summary.stages[1]
                .diagnostic
                .as_deref()
                .unwrap()
                .contains("manual")
        );

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "PARTIAL");
        assert_eq!(json["stages"][1]["status"], "SKIPPED");
    }
}
