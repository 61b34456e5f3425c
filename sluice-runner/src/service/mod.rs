//! Service layer
//!
//! Services carry the per-job work of a run: dispatching a resolved job to a
//! runner, capturing its logs and collecting its outputs. The runner itself
//! sits behind the [`JobRunner`] trait so it can be swapped for tests.

pub mod artifacts;
pub mod dispatch;
pub mod job_runner;
pub mod log_buffer;

pub use artifacts::ArtifactCollector;
pub use dispatch::Dispatcher;
pub use job_runner::{JobRunner, RunHandle, RunOutput, RunSpec, RunnerError};
pub use log_buffer::{InMemoryLogBuffer, LogBufferService};
