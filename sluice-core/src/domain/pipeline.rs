//! Pipeline domain types
//!
//! The in-memory model of a validated `CiPipeline` document. It is built once
//! per run and shared read-only across every stage evaluation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use crate::domain::job::JobStatus;
use crate::error::ModelError;

/// Pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    /// Pipeline variables available to `${VAR}` references
    pub vars: HashMap<String, String>,
    /// Stages in execution order
    pub stages: Vec<Stage>,
    /// Jobs keyed by name
    pub jobs: BTreeMap<String, Job>,
}

impl Pipeline {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            vars: HashMap::new(),
            stages: Vec::new(),
            jobs: BTreeMap::new(),
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Adds a job and a stage referencing it
    pub fn with_stage(mut self, stage: impl Into<String>, job: Job) -> Self {
        self.stages.push(Stage {
            name: stage.into(),
            job: job.name.clone(),
        });
        self.jobs.insert(job.name.clone(), job);
        self
    }

    /// Looks up the job a stage references
    pub fn job_for(&self, stage: &Stage) -> Result<&Job, ModelError> {
        self.jobs.get(&stage.job).ok_or_else(|| ModelError::UnknownJob {
            stage: stage.name.clone(),
            job: stage.job.clone(),
        })
    }

    /// Checks the structural invariants the executor relies on
    ///
    /// A pipeline reaching the executor without passing this check is a
    /// programming error in the caller.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.stages.is_empty() {
            return Err(ModelError::NoStages(self.id.clone()));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(ModelError::EmptyName("stage"));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ModelError::DuplicateStage(stage.name.clone()));
            }
            self.job_for(stage)?;
        }

        for (key, job) in &self.jobs {
            if key != &job.name {
                return Err(ModelError::JobNameMismatch {
                    key: key.clone(),
                    name: job.name.clone(),
                });
            }
            // Job and output names become directories under the artifact dir
            if !is_path_component(&job.name) {
                return Err(ModelError::UnsafeName {
                    kind: "job",
                    name: job.name.clone(),
                });
            }
            if let Some(name) = job.outputs.keys().find(|name| !is_path_component(name)) {
                return Err(ModelError::UnsafeName {
                    kind: "output",
                    name: name.clone(),
                });
            }
            if job.path.trim().is_empty() {
                return Err(ModelError::MissingField {
                    job: job.name.clone(),
                    field: "path",
                });
            }
            if job.command.trim().is_empty() {
                return Err(ModelError::MissingField {
                    job: job.name.clone(),
                    field: "command",
                });
            }
        }

        Ok(())
    }
}

/// Whether `name` can be used as one directory name
pub fn is_path_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Named execution slot referencing exactly one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub job: String,
}

/// Declaration of a single container invocation
///
/// The executor never looks inside `command`; all job logic lives in the
/// invoked tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    /// Container image reference, may contain `${VAR}`
    pub path: String,
    pub command: String,
    pub params: BTreeMap<String, String>,
    /// Values redacted from everything the run records
    pub secure_params: BTreeMap<String, String>,
    pub when: Option<When>,
    /// Artifact name -> path relative to the job workspace
    pub outputs: BTreeMap<String, String>,
    /// Overrides the runner's default job timeout
    pub timeout: Option<Duration>,
    /// Extra dispatch attempts after a runner fault or timeout
    pub retries: u32,
}

impl Job {
    pub fn new(name: impl Into<String>, path: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            command: command.into(),
            params: BTreeMap::new(),
            secure_params: BTreeMap::new(),
            when: None,
            outputs: BTreeMap::new(),
            timeout: None,
            retries: 0,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_secure_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secure_params.insert(key.into(), value.into());
        self
    }

    pub fn with_when(mut self, when: When) -> Self {
        self.when = Some(when);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// The effective run condition, defaulting to "previous stage succeeded"
    pub fn condition(&self) -> When {
        self.when.clone().unwrap_or_default()
    }
}

/// Gate deciding whether a stage's job runs
///
/// Each `None` axis is unconstrained.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct When {
    pub statuses: StatusFilter,
    pub branches: Option<Vec<String>>,
    pub manual: Option<bool>,
}

impl When {
    pub fn on_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        Self {
            statuses: StatusFilter::Only(statuses.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn always() -> Self {
        Self {
            statuses: StatusFilter::Any,
            ..Self::default()
        }
    }

    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.branches = Some(branches.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = Some(manual);
        self
    }
}

/// Accepted statuses of the previous stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    Any,
    Only(BTreeSet<JobStatus>),
}

impl StatusFilter {
    pub fn accepts(&self, status: JobStatus) -> bool {
        match self {
            StatusFilter::Any => true,
            StatusFilter::Only(set) => set.contains(&status),
        }
    }

    /// Whether a stage with this filter runs after a failure
    pub fn admits_failure(&self) -> bool {
        self.accepts(JobStatus::Failure)
    }
}

impl Default for StatusFilter {
    fn default() -> Self {
        StatusFilter::Only(BTreeSet::from([JobStatus::Success]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage() -> Pipeline {
        Pipeline::new("notifications", "Notifications")
            .with_stage(
                "notify",
                Job::new("send-email-notification", "registry/mailer:1", "mailer send"),
            )
            .with_stage("report", Job::new("send-report", "registry/report:1", "report"))
    }

    #[test]
    fn test_validate_accepts_well_formed_pipeline() {
        assert!(two_stage().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_job() {
        let mut pipeline = two_stage();
        pipeline.stages.push(Stage {
            name: "deploy".to_string(),
            job: "deploy-app".to_string(),
        });

        match pipeline.validate() {
            Err(ModelError::UnknownJob { stage, job }) => {
                assert_eq!(stage, "deploy");
                assert_eq!(job, "deploy-app");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_stage() {
        let mut pipeline = two_stage();
        pipeline.stages.push(Stage {
            name: "notify".to_string(),
            job: "send-report".to_string(),
        });

        assert!(matches!(
            pipeline.validate(),
            Err(ModelError::DuplicateStage(name)) if name == "notify"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_pipeline() {
        let pipeline = Pipeline::new("empty", "Empty");
        assert!(matches!(pipeline.validate(), Err(ModelError::NoStages(_))));
    }

    #[test]
    fn test_validate_rejects_missing_command() {
        let pipeline = Pipeline::new("p", "P").with_stage("build", Job::new("build", "img", "  "));
        assert!(matches!(
            pipeline.validate(),
            Err(ModelError::MissingField { field: "command", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_path_like_names() {
        let pipeline = Pipeline::new("p", "P").with_stage(
            "build",
            Job::new("build", "img", "make").with_output("../../../escaped", "out.txt"),
        );
        assert!(matches!(
            pipeline.validate(),
            Err(ModelError::UnsafeName { kind: "output", name }) if name == "../../../escaped"
        ));

        let pipeline = Pipeline::new("p", "P").with_stage("build", Job::new("a/b", "img", "make"));
        assert!(matches!(
            pipeline.validate(),
            Err(ModelError::UnsafeName { kind: "job", .. })
        ));

        let pipeline = Pipeline::new("p", "P").with_stage("build", Job::new("..", "img", "make"));
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_path_component() {
        assert!(is_path_component("build-image"));
        assert!(is_path_component("report.xml"));
        assert!(!is_path_component(""));
        assert!(!is_path_component("."));
        assert!(!is_path_component(".."));
        assert!(!is_path_component("a/b"));
        assert!(!is_path_component("a\\b"));
    }

    #[test]
    fn test_job_without_when_defaults_to_success_filter() {
        let job = Job::new("build", "img", "make");
        let when = job.condition();
        assert!(when.statuses.accepts(JobStatus::Success));
        assert!(!when.statuses.accepts(JobStatus::Failure));
        assert!(!when.statuses.accepts(JobStatus::Skipped));
        assert!(when.branches.is_none());
        assert!(when.manual.is_none());
    }

    #[test]
    fn test_any_filter_admits_failure() {
        assert!(StatusFilter::Any.admits_failure());
        assert!(!StatusFilter::default().admits_failure());
        assert!(
            When::on_statuses([JobStatus::Success, JobStatus::Failure])
                .statuses
                .admits_failure()
        );
    }
}
