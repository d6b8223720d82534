//! Capability interfaces over the external programs the pipeline drives.
//!
//! Each external call is a trait with a uniform `(request) -> Result<_, ToolError>`
//! contract so that the state machines can run against fakes in tests:
//!
//! - [`Simulator`]: submits simulation + reconstruction to the batch system
//! - [`Buncher`]: groups simulation output into file-list batches
//! - [`DataObjectBuilder`]: builds vertex/angular/resolution data objects
//! - [`Merger`]: merges data objects of a sample
//! - [`Fitter`]: runs the multi-sample luminosity fit
//! - [`OffsetEstimator`]: determines the interaction-point offset
//!
//! [`Toolchain`] bundles one implementation of each together with the
//! scheduler [`JobQueue`](crate::scheduler::JobQueue).

pub mod command;
pub mod lmdfit;
pub mod params;
pub mod simulation;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::FileListBuncher;
use crate::error::ToolError;
use crate::pipeline::types::SampleKind;
use crate::pipeline::PipelineConfig;
use crate::scheduler::{JobQueue, SlurmJobQueue};

pub use lmdfit::LmdFitScripts;
pub use params::{AlignmentParams, GeneralRunParams, ReconstructionParams, SimulationParams};
pub use simulation::ScriptSimulator;

/// Everything a simulation + reconstruction submission needs.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub kind: SampleKind,
    pub simulation: SimulationParams,
    pub alignment: AlignmentParams,
    pub reconstruction: ReconstructionParams,
    pub use_devel_queue: bool,
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Directory that will receive the simulation/reconstruction output.
    pub output_dir: PathBuf,
    /// The submission ran synchronously and its output is already complete.
    pub finished: bool,
}

/// Input of a bunching run.
#[derive(Debug, Clone)]
pub struct BunchRequest<'a> {
    /// Tree to scan for simulation output directories.
    pub root: &'a Path,
    /// Only directories whose path contains all of these are bunched.
    pub dir_keywords: &'a [&'a str],
    pub files_per_bunch: usize,
    /// Cap on the number of good files taken per directory.
    pub max_files: Option<usize>,
}

/// One directory processed by a bunching run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunchedDirectory {
    pub dir: PathBuf,
    pub bunch_dir: PathBuf,
    pub lists: usize,
    pub good: usize,
    pub bad: usize,
}

/// Result of a bunching run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BunchSummary {
    pub directories: Vec<BunchedDirectory>,
}

/// Input of a data-object construction run.
#[derive(Debug, Clone)]
pub struct DataObjectRequest<'a> {
    pub kind: SampleKind,
    pub dir: &'a Path,
    /// Keyword selecting the directories to process.
    pub dir_pattern: &'a str,
    pub lab_momentum: f64,
    pub data_config: &'a Path,
    /// Integrated elastic cross section in mb, for angular data.
    pub elastic_cross_section: Option<f64>,
}

/// Input of a merge run.
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    pub kind: SampleKind,
    pub dir: &'a Path,
    pub dir_pattern: &'a str,
}

/// Input of the luminosity fit.
#[derive(Debug, Clone)]
pub struct FitRequest<'a> {
    /// Acceptance and resolution (box-generator) data.
    pub acceptance_dir: &'a Path,
    /// Filtered elastic data to fit.
    pub filtered_dir: &'a Path,
    pub dir_pattern: &'a str,
    pub fit_config: &'a Path,
}

#[async_trait]
pub trait Simulator: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> Result<Submission, ToolError>;
}

pub trait Buncher: Send + Sync {
    fn bunch(&self, request: &BunchRequest<'_>) -> Result<BunchSummary, ToolError>;
}

#[async_trait]
pub trait DataObjectBuilder: Send + Sync {
    async fn build(&self, request: &DataObjectRequest<'_>) -> Result<(), ToolError>;
}

#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(&self, request: &MergeRequest<'_>) -> Result<(), ToolError>;
}

#[async_trait]
pub trait Fitter: Send + Sync {
    async fn fit(&self, request: &FitRequest<'_>) -> Result<(), ToolError>;
}

#[async_trait]
pub trait OffsetEstimator: Send + Sync {
    /// Determines the interaction point from merged vertex data and returns
    /// the path of the written `reco_ip.json`.
    async fn estimate(&self, merged_vertex_dir: &Path, fit_config: &Path)
        -> Result<PathBuf, ToolError>;
}

/// The set of external capabilities a pipeline run uses.
#[derive(Clone)]
pub struct Toolchain {
    pub queue: Arc<dyn JobQueue>,
    pub simulator: Arc<dyn Simulator>,
    pub buncher: Arc<dyn Buncher>,
    pub data_builder: Arc<dyn DataObjectBuilder>,
    pub merger: Arc<dyn Merger>,
    pub fitter: Arc<dyn Fitter>,
    pub offset_estimator: Arc<dyn OffsetEstimator>,
}

impl Toolchain {
    /// Production toolchain: Slurm queue, the lmdfit python utilities and
    /// binaries, and native bunching.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let scripts = Arc::new(LmdFitScripts::new(
            config.python.clone(),
            config.script_dir.clone(),
            config.bin_dir(),
        ));
        Self {
            queue: Arc::new(SlurmJobQueue::new(config.queue_user.clone())),
            simulator: Arc::new(ScriptSimulator::new(
                config.python.clone(),
                config.script_dir.clone(),
            )),
            buncher: Arc::new(FileListBuncher::new(config.min_file_size)),
            data_builder: scripts.clone(),
            merger: scripts.clone(),
            fitter: scripts.clone(),
            offset_estimator: scripts,
        }
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}
