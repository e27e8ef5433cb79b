//! Typed error definitions for sluice.
//! Provides a small set of well-known failure modes for better logs and tests.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SluiceError {
    #[error("No rule matched {0}")]
    NoRuleMatch(PathBuf),

    #[error("Multiple rules matched {path}: {names:?}")]
    AmbiguousRules { path: PathBuf, names: Vec<String> },

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Source path not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Insufficient disk space for destination {dest}: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        required: u64,
        available: u64,
        dest: PathBuf,
    },

    #[error("Content hash mismatch between {left} and {right}")]
    HashMismatch { left: PathBuf, right: PathBuf },

    #[error("External tool '{program}' failed: {detail}")]
    ToolFailed { program: String, detail: String },

    #[error("No staging directory with enough free space for server '{server}'")]
    NoStagingSpace { server: String },

    #[error("Teardown left components registered: {remaining:?}")]
    TeardownIncomplete { remaining: Vec<String> },

    #[error("Operation interrupted by shutdown")]
    Interrupted,
}

impl SluiceError {
    /// Stable short code for structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            SluiceError::NoRuleMatch(_) => "no_rule_match",
            SluiceError::AmbiguousRules { .. } => "ambiguous_rules",
            SluiceError::DestinationExists(_) => "destination_exists",
            SluiceError::SourceMissing(_) => "source_missing",
            SluiceError::InsufficientSpace { .. } => "insufficient_space",
            SluiceError::HashMismatch { .. } => "hash_mismatch",
            SluiceError::ToolFailed { .. } => "tool_failed",
            SluiceError::NoStagingSpace { .. } => "no_staging_space",
            SluiceError::TeardownIncomplete { .. } => "teardown_incomplete",
            SluiceError::Interrupted => "interrupted",
        }
    }
}
