//! Scenario pipeline for luminosity determination.
//!
//! A scenario is one simulated elastic-scattering campaign directory. It is
//! driven through four fixed stages:
//!
//! 1. **Vertex data**: bunch the raw reconstruction output, build and merge
//!    vertex data objects
//! 2. **Interaction point**: determine the IP offset from the merged vertex
//!    data (runs locally, never polled)
//! 3. **Angular and acceptance data**: re-reconstruct the elastic sample with
//!    IP cuts and simulate box-generator data for acceptance and resolution,
//!    both as nested [`SimulationTask`]s
//! 4. **Fit**: run the multi-sample luminosity fit
//!
//! # Components
//!
//! - **Orchestrator**: advances one scenario by one tick
//! - **Runner**: advances one simulation task (simulate, build, merge)
//! - **Config**: paths, sample sizes and probing policy
//! - **Types**: scenario, task and sample-kind definitions
//!
//! No progress is kept outside the filesystem. Every tick re-derives what is
//! done from the artifacts on disk, so a restarted run picks up where the
//! previous one stopped.
//!
//! # Example
//!
//! ```rust,ignore
//! use lmd_pipeline::pipeline::{PipelineConfig, Scenario, ScenarioOrchestrator};
//!
//! let config = PipelineConfig::from_env()?;
//! let orchestrator = ScenarioOrchestrator::new(config, toolchain);
//!
//! let mut scenario = Scenario::new("/data/plab_1.5GeV/dpm_elastic/1-500_uncut");
//! let outcome = orchestrator.tick(&mut scenario).await?;
//! println!("{} is {} at stage {}", scenario.root().display(), outcome, scenario.stage());
//! ```

pub mod config;
pub mod orchestrator;
pub mod runner;
pub mod types;

pub use config::{ConfigError, PipelineConfig};
pub use orchestrator::{
    discover_scenarios, parse_lab_momentum, read_cross_section, read_ip_offset, PipelineError,
    ScenarioOrchestrator, ScenarioOutcome,
};
pub use runner::{TaskOutcome, TaskRunner};
pub use types::{
    IpOffset, SampleKind, SampleKindSpec, Scenario, ScenarioStage, SearchRoot, SimulationTask,
    TaskId, TaskStage, MERGE_KEYWORDS, SAMPLE_KINDS,
};
