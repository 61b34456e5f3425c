//! `CiPipeline` document format
//!
//! The YAML contract pipeline authors write. Loosely typed fields (`statuses`
//! given as a scalar or a list, numeric values in maps) are normalized here
//! into the strict domain model, so the executor never sees raw document
//! shapes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::domain::job::JobStatus;
use crate::domain::pipeline::{Job, Pipeline, Stage, StatusFilter, When};
use crate::error::ModelError;

/// Only document kind the executor accepts
pub const KIND: &str = "CiPipeline";

/// Errors raised while loading a pipeline document
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read pipeline document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pipeline document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported document kind '{0}', expected '{KIND}'")]
    UnsupportedKind(String),

    #[error("job '{job}': invalid status '{value}' in when.statuses")]
    InvalidStatus { job: String, value: String },

    #[error("job '{job}': timeout_seconds must be greater than 0")]
    ZeroTimeout { job: String },

    #[error("'{key}' is an unquoted decimal number ({value}); quote it to keep its exact text")]
    UnquotedDecimal { key: String, value: f64 },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Top-level document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub pipeline: PipelineSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vars: HashMap<String, Scalar>,
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub job: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub path: String,
    pub command: String,
    #[serde(default)]
    pub input: InputSpec,
    #[serde(default)]
    pub when: Option<WhenSpec>,
    #[serde(default)]
    pub output: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(default)]
    pub params: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub secure_params: BTreeMap<String, Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhenSpec {
    #[serde(default)]
    pub statuses: Option<OneOrMany>,
    #[serde(default)]
    pub branches: Option<OneOrMany>,
    #[serde(default)]
    pub manual: Option<bool>,
}

/// A value written either as a single item or as a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// A YAML scalar kept as its string form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    /// Text of the value as the pipeline sees it
    ///
    /// Decimals are refused: YAML has already dropped their original text,
    /// so `1.10` would silently become `1.1`.
    fn into_text(self, key: &str) -> Result<String, DocumentError> {
        match self {
            Scalar::String(s) => Ok(s),
            Scalar::Bool(b) => Ok(b.to_string()),
            Scalar::Int(i) => Ok(i.to_string()),
            Scalar::Float(value) => Err(DocumentError::UnquotedDecimal {
                key: key.to_string(),
                value,
            }),
        }
    }
}

/// Parses and validates a pipeline document
pub fn parse(yaml: &str) -> Result<Pipeline, DocumentError> {
    let document: PipelineDocument = serde_yaml::from_str(yaml)?;
    Pipeline::try_from(document)
}

/// Reads, parses and validates a pipeline document from disk
pub fn load(path: &Path) -> Result<Pipeline, DocumentError> {
    let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Loaded pipeline document from {}", path.display());
    parse(&content)
}

impl TryFrom<PipelineDocument> for Pipeline {
    type Error = DocumentError;

    fn try_from(document: PipelineDocument) -> Result<Self, Self::Error> {
        if document.kind != KIND {
            return Err(DocumentError::UnsupportedKind(document.kind));
        }

        let spec = document.pipeline;
        let mut jobs = BTreeMap::new();
        for (name, job) in spec.jobs {
            let job = job_from_spec(&name, job)?;
            jobs.insert(name, job);
        }

        let pipeline = Pipeline {
            id: spec.id,
            name: spec.name,
            vars: stringify(spec.vars)?,
            stages: spec
                .stages
                .into_iter()
                .map(|stage| Stage {
                    name: stage.name,
                    job: stage.job,
                })
                .collect(),
            jobs,
        };

        pipeline.validate()?;
        Ok(pipeline)
    }
}

fn job_from_spec(name: &str, spec: JobSpec) -> Result<Job, DocumentError> {
    let timeout = match spec.timeout_seconds {
        Some(0) => {
            return Err(DocumentError::ZeroTimeout {
                job: name.to_string(),
            });
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };

    let when = spec
        .when
        .map(|when| when_from_spec(name, when))
        .transpose()?;

    Ok(Job {
        name: name.to_string(),
        path: spec.path,
        command: spec.command,
        params: stringify(spec.input.params)?,
        secure_params: stringify(spec.input.secure_params)?,
        when,
        outputs: spec.output,
        timeout,
        retries: spec.retries,
    })
}

fn when_from_spec(job: &str, spec: WhenSpec) -> Result<When, DocumentError> {
    let statuses = match spec.statuses {
        None => StatusFilter::default(),
        Some(values) => status_filter(job, values.into_vec())?,
    };

    Ok(When {
        statuses,
        branches: spec.branches.map(OneOrMany::into_vec),
        manual: spec.manual,
    })
}

fn status_filter(job: &str, values: Vec<String>) -> Result<StatusFilter, DocumentError> {
    if values.is_empty() {
        return Err(DocumentError::InvalidStatus {
            job: job.to_string(),
            value: "[]".to_string(),
        });
    }

    if values.iter().any(|value| value.trim().eq_ignore_ascii_case("any")) {
        return Ok(StatusFilter::Any);
    }

    let mut accepted = BTreeSet::new();
    for value in values {
        let status = value
            .parse::<JobStatus>()
            .ok()
            .filter(|status| status.is_terminal())
            .ok_or_else(|| DocumentError::InvalidStatus {
                job: job.to_string(),
                value: value.clone(),
            })?;
        accepted.insert(status);
    }

    Ok(StatusFilter::Only(accepted))
}

fn stringify<M>(values: impl IntoIterator<Item = (String, Scalar)>) -> Result<M, DocumentError>
where
    M: FromIterator<(String, String)>,
{
    values
        .into_iter()
        .map(|(key, value)| {
            let text = value.into_text(&key)?;
            Ok::<_, DocumentError>((key, text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFICATIONS: &str = r#"
apiVersion: v1
kind: CiPipeline
pipeline:
  id: notifications
  name: Notification pipeline
  vars:
    REGISTRY: registry.example.com
    RETRIES: 3
  stages:
    - name: notify
      job: send-email-notification
    - name: report
      job: send-report
  jobs:
    send-email-notification:
      path: ${REGISTRY}/tools/mailer:1.0
      command: mailer send
      input:
        params:
          TO: team@example.com
        secure_params:
          EMAIL_PASSWORD: ${EMAIL_PASSWORD}
      when:
        statuses: SUCCESS
    send-report:
      path: ${REGISTRY}/tools/report:1.0
      command: report build
      when:
        statuses: [success]
        branches: [main, dev]
        manual: false
      output:
        HTML_REPORT: report.html
        MD_REPORT: report.md
      timeout_seconds: 120
      retries: 1
"#;

    #[test]
    fn test_parse_example_document() {
        let pipeline = parse(NOTIFICATIONS).unwrap();

        assert_eq!(pipeline.id, "notifications");
        assert_eq!(pipeline.vars["RETRIES"], "3");
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[0].job, "send-email-notification");

        let mailer = &pipeline.jobs["send-email-notification"];
        assert_eq!(mailer.params["TO"], "team@example.com");
        assert_eq!(mailer.secure_params["EMAIL_PASSWORD"], "${EMAIL_PASSWORD}");
        assert_eq!(
            mailer.condition().statuses,
            StatusFilter::Only(BTreeSet::from([JobStatus::Success]))
        );

        let report = &pipeline.jobs["send-report"];
        let when = report.when.as_ref().unwrap();
        assert_eq!(
            when.branches,
            Some(vec!["main".to_string(), "dev".to_string()])
        );
        assert_eq!(when.manual, Some(false));
        assert_eq!(report.outputs.len(), 2);
        assert_eq!(report.timeout, Some(Duration::from_secs(120)));
        assert_eq!(report.retries, 1);
    }

    #[test]
    fn test_statuses_any_and_lists() {
        assert_eq!(
            status_filter("j", vec!["ANY".to_string()]).unwrap(),
            StatusFilter::Any
        );
        assert_eq!(
            status_filter("j", vec!["SUCCESS".to_string(), "failure".to_string()]).unwrap(),
            StatusFilter::Only(BTreeSet::from([JobStatus::Success, JobStatus::Failure]))
        );
    }

    #[test]
    fn test_statuses_reject_non_terminal_and_unknown() {
        assert!(matches!(
            status_filter("j", vec!["RUNNING".to_string()]),
            Err(DocumentError::InvalidStatus { .. })
        ));
        assert!(matches!(
            status_filter("j", vec!["GREEN".to_string()]),
            Err(DocumentError::InvalidStatus { .. })
        ));
        assert!(status_filter("j", Vec::new()).is_err());
    }

    #[test]
    fn test_missing_when_uses_default() {
        let yaml = r#"
apiVersion: v1
kind: CiPipeline
pipeline:
  id: p
  name: P
  stages: [{name: build, job: build}]
  jobs:
    build: {path: img, command: make}
"#;
        let pipeline = parse(yaml).unwrap();
        assert!(pipeline.jobs["build"].when.is_none());
        assert_eq!(
            pipeline.jobs["build"].condition().statuses,
            StatusFilter::default()
        );
    }

    #[test]
    fn test_unquoted_decimal_is_rejected() {
        let yaml = NOTIFICATIONS.replace("RETRIES: 3", "TAG: 1.10");
        match parse(&yaml) {
            Err(DocumentError::UnquotedDecimal { key, .. }) => assert_eq!(key, "TAG"),
            other => panic!("unexpected result: {:?}", other),
        }

        let yaml = NOTIFICATIONS.replace("RETRIES: 3", "TAG: \"1.10\"");
        assert_eq!(parse(&yaml).unwrap().vars["TAG"], "1.10");
    }

    #[test]
    fn test_rejects_other_kinds() {
        let yaml = NOTIFICATIONS.replace("kind: CiPipeline", "kind: Deployment");
        assert!(matches!(
            parse(&yaml),
            Err(DocumentError::UnsupportedKind(kind)) if kind == "Deployment"
        ));
    }

    #[test]
    fn test_rejects_duplicate_jobs_block() {
        let yaml = r#"
apiVersion: v1
kind: CiPipeline
pipeline:
  id: p
  name: P
  stages: [{name: build, job: build}]
  jobs:
    build: {path: img, command: make}
  jobs:
    test: {path: img, command: make test}
"#;
        assert!(matches!(parse(yaml), Err(DocumentError::Yaml(_))));
    }

    #[test]
    fn test_rejects_stage_with_unknown_job() {
        let yaml = r#"
apiVersion: v1
kind: CiPipeline
pipeline:
  id: p
  name: P
  stages: [{name: deploy, job: deploy}]
  jobs:
    build: {path: img, command: make}
"#;
        assert!(matches!(
            parse(yaml),
            Err(DocumentError::Model(ModelError::UnknownJob { .. }))
        ));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let yaml = NOTIFICATIONS.replace("timeout_seconds: 120", "timeout_seconds: 0");
        assert!(matches!(
            parse(&yaml),
            Err(DocumentError::ZeroTimeout { job }) if job == "send-report"
        ));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = load(Path::new("/nonexistent/pipeline.yaml")).unwrap_err();
        assert!(matches!(err, DocumentError::Io { .. }));
    }
}
