//! Run context
//!
//! State shared by every stage of one run: the pipeline, the variables
//! (declared vars with runtime overrides merged over them, fixed for the
//! whole run), the trigger and the cancellation token.

use sluice_core::domain::pipeline::Pipeline;
use sluice_core::domain::run::TriggerContext;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::service::job_runner::RunHandle;

pub const RUN_ID_ENV: &str = "SLUICE_RUN_ID";
pub const JOB_ENV: &str = "SLUICE_JOB";
pub const BRANCH_ENV: &str = "SLUICE_BRANCH";

#[derive(Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub pipeline: Arc<Pipeline>,
    pub vars: Arc<HashMap<String, String>>,
    pub trigger: TriggerContext,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        pipeline: Arc<Pipeline>,
        trigger: TriggerContext,
        overrides: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Self {
        let mut vars = pipeline.vars.clone();
        vars.extend(overrides);

        Self {
            run_id,
            pipeline,
            vars: Arc::new(vars),
            trigger,
            cancel,
        }
    }

    /// A fresh handle for one dispatch of `job`
    pub fn handle(&self, job: &str) -> RunHandle {
        RunHandle::new(self.run_id, job)
    }

    /// Variables describing the run, added to every job's environment
    pub fn job_env(&self, job: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(RUN_ID_ENV.to_string(), self.run_id.to_string());
        env.insert(JOB_ENV.to_string(), job.to_string());
        if let Some(branch) = &self.trigger.branch {
            env.insert(BRANCH_ENV.to_string(), branch.clone());
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_declared_vars() {
        let pipeline = Arc::new(
            Pipeline::new("p", "P")
                .with_var("ENV", "staging")
                .with_var("REGION", "eu"),
        );
        let overrides = HashMap::from([("ENV".to_string(), "production".to_string())]);

        let context = RunContext::new(
            Uuid::new_v4(),
            pipeline,
            TriggerContext::default(),
            overrides,
            CancellationToken::new(),
        );

        assert_eq!(context.vars["ENV"], "production");
        assert_eq!(context.vars["REGION"], "eu");
    }

    #[test]
    fn test_job_env() {
        let run_id = Uuid::new_v4();
        let context = RunContext::new(
            run_id,
            Arc::new(Pipeline::new("p", "P")),
            TriggerContext::on_branch("main"),
            HashMap::new(),
            CancellationToken::new(),
        );

        let env = context.job_env("build");
        assert_eq!(env[RUN_ID_ENV], run_id.to_string());
        assert_eq!(env[JOB_ENV], "build");
        assert_eq!(env[BRANCH_ENV], "main");

        let handle = context.handle("build");
        assert_eq!(handle.run_id, run_id);
        assert_ne!(handle.id, context.handle("build").id);
    }
}
