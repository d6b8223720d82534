//! lmd-pipeline: resumable luminosity determination over simulation campaigns.
//!
//! This library drives scenario directories of simulated elastic-scattering
//! data through vertex data creation, interaction point determination,
//! angular and acceptance data creation, and the luminosity fit, polling an
//! external batch scheduler until each stage's output exists.

pub mod artifacts;
pub mod cli;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod tools;

// Re-export commonly used error types
pub use error::{ProbeError, ToolError};
pub use pipeline::{ConfigError, PipelineError};
