//! Command-line interface for lmd-pipeline.
//!
//! Provides the `run` command that drives the scenario pipeline, plus `scan`,
//! `probe` and `bunch` for inspecting and preparing simulation output.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
