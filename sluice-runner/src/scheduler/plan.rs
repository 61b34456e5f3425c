//! Stage batching
//!
//! Splits the declared stage order into batches that may run at the same
//! time. Sequentially every stage is its own batch. In parallel mode a stage
//! whose status filter is `Any` does not depend on its predecessor's outcome,
//! so it joins the preceding batch unless that batch already runs its job.

use sluice_core::domain::pipeline::{Pipeline, StatusFilter};
use std::collections::HashSet;

/// Indices into `pipeline.stages`, grouped by batch, in declared order
pub fn batches(pipeline: &Pipeline, parallel: bool) -> Vec<Vec<usize>> {
    let mut batches: Vec<Vec<usize>> = Vec::new();
    let mut batch_jobs: HashSet<&str> = HashSet::new();

    for (idx, stage) in pipeline.stages.iter().enumerate() {
        let independent = parallel
            && pipeline
                .jobs
                .get(&stage.job)
                .is_some_and(|job| job.condition().statuses == StatusFilter::Any);

        match batches.last_mut() {
            Some(batch) if independent && !batch_jobs.contains(stage.job.as_str()) => {
                batch.push(idx);
            }
            _ => {
                batches.push(vec![idx]);
                batch_jobs.clear();
            }
        }
        batch_jobs.insert(stage.job.as_str());
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::pipeline::{Job, Stage, When};

    fn pipeline() -> Pipeline {
        Pipeline::new("p", "P")
            .with_stage("build", Job::new("build", "img", "make"))
            .with_stage("lint", Job::new("lint", "img", "lint").with_when(When::always()))
            .with_stage("audit", Job::new("audit", "img", "audit").with_when(When::always()))
            .with_stage("test", Job::new("test", "img", "make test"))
            .with_stage("notify", Job::new("notify", "img", "notify").with_when(When::always()))
    }

    #[test]
    fn test_sequential_plan() {
        assert_eq!(
            batches(&pipeline(), false),
            vec![vec![0], vec![1], vec![2], vec![3], vec![4]]
        );
    }

    #[test]
    fn test_parallel_plan_groups_any_stages() {
        assert_eq!(
            batches(&pipeline(), true),
            vec![vec![0, 1, 2], vec![3, 4]]
        );
    }

    #[test]
    fn test_same_job_never_shares_a_batch() {
        let mut pipeline = Pipeline::new("p", "P")
            .with_stage("notify", Job::new("notify", "img", "notify").with_when(When::always()));
        pipeline.stages.push(Stage {
            name: "notify-again".to_string(),
            job: "notify".to_string(),
        });

        assert_eq!(batches(&pipeline, true), vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_first_stage_opens_a_batch() {
        let pipeline = Pipeline::new("p", "P")
            .with_stage("cleanup", Job::new("cleanup", "img", "rm").with_when(When::always()));
        assert_eq!(batches(&pipeline, true), vec![vec![0]]);
    }
}
