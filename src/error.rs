//! Error types shared across the pipeline.
//!
//! Defines the errors raised by the leaf subsystems:
//! - External program invocation (simulation submission, data-object
//!   construction, merging, fitting, offset determination, queue queries)
//! - Artifact probing (file inventory and expected-count derivation)
//!
//! Scenario-level errors live in [`crate::pipeline::PipelineError`], which
//! wraps both of these.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while invoking an external program.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{tool}' exited with non-zero code {code}: {stderr}")]
    NonZeroExit {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Unexpected output from '{tool}': {message}")]
    InvalidOutput { tool: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while probing a directory for stage artifacts.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Invalid file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Cannot derive expected file count for {0}: no '<start>-<end>_..cut' segment and no job count given")]
    UnknownExpectedCount(PathBuf),

    #[error("Scheduler query failed: {0}")]
    Queue(#[from] ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
