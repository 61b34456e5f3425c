//! Scheduler layer
//!
//! Decides the order stages run in and drives a run from its first stage to
//! its aggregated status.

pub mod executor;
pub mod plan;

pub use executor::{ExecutorError, PipelineExecutor};
