//! Sluice Core
//!
//! Core types and pure logic for the Sluice pipeline executor.
//!
//! This crate contains:
//! - Domain types: the pipeline model and the run records produced by executing it
//! - Condition evaluation: the `when` gate deciding whether a stage runs
//! - Parameter resolution: `${VAR}` substitution and secret redaction
//! - Status aggregation: folding stage results into a pipeline outcome
//! - DTOs: the `CiPipeline` document format and display summaries
//!
//! Nothing here performs I/O beyond reading a pipeline document; execution
//! lives in `sluice-runner`.

pub mod condition;
pub mod domain;
pub mod dto;
pub mod error;
pub mod params;
pub mod status;
