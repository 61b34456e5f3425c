//! Configuration module
//!
//! Global CLI settings shared by every command.

use clap::ValueEnum;

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Colored, human-readable output
    Text,
    /// JSON on stdout, for scripting
    Json,
}

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub format: OutputFormat,
}
