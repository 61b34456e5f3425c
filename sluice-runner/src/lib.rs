//! Sluice Runner
//!
//! Executes `CiPipeline` runs: stages are walked in order, each stage's job
//! is gated by its condition, resolved, dispatched to a container runner and
//! has its outputs collected, and the run's status is aggregated at the end.
//!
//! Architecture:
//! - Configuration: executor settings from environment or defaults
//! - Services: dispatch, log capture and artifact collection per job
//! - Scheduler: stage batching and the run loop
//! - Podman: the container-backed [`JobRunner`](service::JobRunner)

pub mod config;
pub mod context;
pub mod execution;
pub mod podman;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use podman::PodmanRunner;
pub use scheduler::{ExecutorError, PipelineExecutor};
