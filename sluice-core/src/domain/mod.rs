//! Core domain types
//!
//! This module contains the structures shared by every part of Sluice.
//! The pipeline model is produced once by the document loader and then only
//! read; the run records are produced by the scheduler while it executes.

pub mod job;
pub mod log;
pub mod pipeline;
pub mod run;
