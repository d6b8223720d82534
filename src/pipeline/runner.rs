//! Task runner driving one simulation task through its stages.
//!
//! A task is advanced by [`TaskRunner::advance`], which takes the task by
//! value and hands back its new state together with a [`TaskOutcome`]. Within
//! one call a task falls through as many stages as the filesystem allows;
//! whatever needs the batch system stops the call at `Pending`.
//!
//! Every stage starts by looking for its own output, so re-running a stage
//! after a restart never duplicates work that already landed on disk.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactProber, DirectorySearcher, ProbeStatus, SIMULATION_OUTPUT_GLOB};
use crate::tools::params::load_json;
use crate::tools::{
    AlignmentParams, BunchRequest, DataObjectRequest, GeneralRunParams, MergeRequest,
    ReconstructionParams, SimulationParams, SubmissionRequest, Toolchain,
};

use super::config::PipelineConfig;
use super::orchestrator::PipelineError;
use super::types::{
    round_to_places, SampleKind, Scenario, SearchRoot, SimulationTask, TaskStage,
    MERGE_KEYWORDS, SIMULATION_OUTPUT_PREFIX,
};

/// Elastic simulation parameters, stored next to the scenario directory.
pub const SIM_PARAMS_FILE: &str = "sim_params.config";
/// Reconstruction parameters, stored in the scenario directory.
pub const RECO_PARAMS_FILE: &str = "reco_params.config";

/// Result of advancing a task by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Still has work outstanding; keep it on the scenario.
    Pending,
    /// Reached the terminal stage; remove it from the scenario.
    Finished,
    /// Output is missing and the scheduler is idle.
    Failed,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Pending => write!(f, "pending"),
            TaskOutcome::Finished => write!(f, "finished"),
            TaskOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Advances simulation tasks against the external toolchain.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    tools: Toolchain,
    config: PipelineConfig,
    prober: ArtifactProber,
}

impl TaskRunner {
    /// Creates a new task runner.
    pub fn new(tools: Toolchain, config: PipelineConfig) -> Self {
        let prober = ArtifactProber::new(config.probe_policy());
        Self {
            tools,
            config,
            prober,
        }
    }

    /// Advances `task`, owned by `scenario`, as far as possible.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` when an external program fails, a parameter
    /// file cannot be read, or the scenario lacks data an earlier stage should
    /// have provided.
    pub async fn advance(
        &self,
        mut task: SimulationTask,
        scenario: &Scenario,
    ) -> Result<(SimulationTask, TaskOutcome), PipelineError> {
        info!(
            scenario = %scenario.root().display(),
            task = %task.id(),
            kind = %task.kind(),
            stage = %task.stage(),
            sub_stage = task.sub_stage(),
            "Advancing simulation task"
        );

        if task.stage() == TaskStage::Simulate {
            match self.simulate(&mut task, scenario).await? {
                ProbeStatus::Ready => {}
                ProbeStatus::Waiting => return Ok((task, TaskOutcome::Pending)),
                ProbeStatus::Failed => {
                    task.fail();
                    warn!(
                        scenario = %scenario.root().display(),
                        kind = %task.kind(),
                        "Simulation output missing and no jobs pending"
                    );
                    return Ok((task, TaskOutcome::Failed));
                }
            }
        }

        if task.stage() == TaskStage::BuildDataObjects
            && !self.build_data_objects(&mut task, scenario).await?
        {
            return Ok((task, TaskOutcome::Pending));
        }

        if task.stage() == TaskStage::Merge {
            self.merge(&mut task).await?;
        }

        if task.is_done() {
            info!(
                scenario = %scenario.root().display(),
                kind = %task.kind(),
                "Simulation task finished"
            );
            Ok((task, TaskOutcome::Finished))
        } else {
            Ok((task, TaskOutcome::Pending))
        }
    }

    /// Stage 1. `Ready` means the task moved on to stage 2.
    async fn simulate(
        &self,
        task: &mut SimulationTask,
        scenario: &Scenario,
    ) -> Result<ProbeStatus, PipelineError> {
        let spec = task.kind().spec();
        let search_root = match task.working_dir() {
            Some(dir) => Some(dir.to_path_buf()),
            None => default_search_root(spec.search_root, scenario.root()),
        };
        let searcher = DirectorySearcher::new(spec.simulation_keywords.iter().copied());
        let found = search_root
            .as_deref()
            .and_then(|root| searcher.find_first(root, &[SIMULATION_OUTPUT_PREFIX]));

        let status = if let Some(dir) = found {
            debug!(kind = %task.kind(), dir = %dir.display(), "Found simulation output");
            if task.working_dir().is_none() {
                task.set_working_dir(dir.clone());
            }
            self.probe_output(task, &dir).await?
        } else if task.needs_attempt() {
            if !spec.simulated {
                warn!(
                    scenario = %scenario.root().display(),
                    kind = %task.kind(),
                    "No simulation output found and this kind is never simulated"
                );
                return Ok(ProbeStatus::Failed);
            }
            let request = self.submission_request(task.kind(), scenario)?;
            let submission = self.tools.simulator.submit(&request).await?;
            task.set_working_dir(submission.output_dir);
            if let Some(jobs) = usize::try_from(request.reconstruction.num_samples)
                .ok()
                .filter(|&n| n > 0)
            {
                task.set_submitted_jobs(jobs);
            }
            if submission.finished {
                task.complete_stage();
                return Ok(ProbeStatus::Ready);
            }
            task.mark_attempted();
            return Ok(ProbeStatus::Waiting);
        } else if let Some(dir) = task.working_dir().map(Path::to_path_buf) {
            // Submitted, but the output directory is not visible yet.
            self.probe_output(task, &dir).await?
        } else {
            ProbeStatus::Failed
        };

        match status {
            ProbeStatus::Ready => {
                info!(kind = %task.kind(), "Found simulation files, skipping simulation");
                task.complete_stage();
            }
            ProbeStatus::Waiting => {
                info!(
                    kind = %task.kind(),
                    "Still waiting for simulation jobs to complete"
                );
            }
            ProbeStatus::Failed => {}
        }
        Ok(status)
    }

    async fn probe_output(
        &self,
        task: &SimulationTask,
        dir: &Path,
    ) -> Result<ProbeStatus, PipelineError> {
        let job_count = task
            .submitted_jobs()
            .or_else(|| self.fallback_job_count(task.kind()));
        let report = self
            .prober
            .probe(dir, SIMULATION_OUTPUT_GLOB, job_count, self.tools.queue.as_ref())
            .await?;
        Ok(report.status)
    }

    /// Job count used when the output directory name carries no job range and
    /// the task made no submission of its own.
    fn fallback_job_count(&self, kind: SampleKind) -> Option<usize> {
        match kind {
            SampleKind::Vertex => None,
            SampleKind::Angular => self.config.num_samples.map(|n| n as usize),
            SampleKind::AcceptanceResolution => Some(self.config.box_num_samples as usize),
        }
    }

    /// Stage 2. Returns `true` when the data objects already exist.
    async fn build_data_objects(
        &self,
        task: &mut SimulationTask,
        scenario: &Scenario,
    ) -> Result<bool, PipelineError> {
        let spec = task.kind().spec();
        let dir = working_dir(task)?;
        let searcher = DirectorySearcher::new(spec.data_keywords.iter().copied());
        if searcher.find_first(&dir, &[spec.data_prefix]).is_some() {
            info!(kind = %task.kind(), "Data objects exist, skipping bunching and creation");
            task.complete_stage();
            return Ok(true);
        }

        if !task.needs_attempt() {
            info!(
                kind = %task.kind(),
                "Still waiting for data object creation jobs to complete"
            );
            return Ok(false);
        }

        let summary = self.tools.buncher.bunch(&BunchRequest {
            root: &dir,
            dir_keywords: spec.simulation_keywords,
            files_per_bunch: self.config.files_per_bunch,
            max_files: self.config.num_samples.map(|n| n as usize),
        })?;
        debug!(
            kind = %task.kind(),
            directories = summary.directories.len(),
            "Bunched simulation output"
        );

        let lab_momentum = scenario
            .lab_momentum()
            .ok_or_else(|| PipelineError::LabMomentum(scenario.root().to_path_buf()))?;
        let elastic_cross_section = match task.kind() {
            SampleKind::Angular => scenario.elastic_cross_section(),
            _ => None,
        };
        let data_config = self.config.data_config_path();
        self.tools
            .data_builder
            .build(&DataObjectRequest {
                kind: task.kind(),
                dir: &dir,
                dir_pattern: spec.dir_pattern(),
                lab_momentum,
                data_config: &data_config,
                elastic_cross_section,
            })
            .await?;

        task.mark_attempted();
        Ok(false)
    }

    /// Stage 3. Always completes.
    async fn merge(&self, task: &mut SimulationTask) -> Result<(), PipelineError> {
        let spec = task.kind().spec();
        let dir = working_dir(task)?;
        let searcher = DirectorySearcher::new(MERGE_KEYWORDS.iter().copied());
        if searcher.find_first(&dir, &[spec.data_prefix]).is_none() {
            self.tools
                .merger
                .merge(&MergeRequest {
                    kind: task.kind(),
                    dir: &dir,
                    dir_pattern: spec.dir_pattern(),
                })
                .await?;
        } else {
            debug!(kind = %task.kind(), "Merged data exists, skipping merge");
        }
        task.complete_stage();
        Ok(())
    }

    /// Assembles the submission for a task that has no output yet.
    pub fn submission_request(
        &self,
        kind: SampleKind,
        scenario: &Scenario,
    ) -> Result<SubmissionRequest, PipelineError> {
        let ip_offset = scenario
            .ip_offset()
            .ok_or_else(|| PipelineError::MissingIpOffset(scenario.root().to_path_buf()))?;

        let (simulation, alignment, reconstruction) = match kind {
            SampleKind::Angular => {
                let sim_path = scenario
                    .root()
                    .parent()
                    .unwrap_or(scenario.root())
                    .join(SIM_PARAMS_FILE);
                let reco_path = scenario.root().join(RECO_PARAMS_FILE);
                let sim: SimulationParams = load_params(&sim_path)?;
                let reco: ReconstructionParams = load_params(&reco_path)?;
                elastic_params(sim, reco, ip_offset.as_array(), self.config.num_samples)
            }
            SampleKind::AcceptanceResolution => {
                let lab_momentum = scenario
                    .lab_momentum()
                    .ok_or_else(|| PipelineError::LabMomentum(scenario.root().to_path_buf()))?;
                let general = GeneralRunParams::new(
                    self.config.box_num_events_per_sample,
                    self.config.box_num_samples,
                    lab_momentum,
                );
                box_params(&general, ip_offset.as_array(), ip_offset.transverse())
            }
            SampleKind::Vertex => return Err(PipelineError::NotSimulated(kind)),
        };

        Ok(SubmissionRequest {
            kind,
            simulation,
            alignment,
            reconstruction,
            use_devel_queue: self.config.use_devel_queue,
        })
    }
}

fn default_search_root(root: SearchRoot, scenario_dir: &Path) -> Option<PathBuf> {
    match root {
        SearchRoot::ScenarioDir => Some(scenario_dir.to_path_buf()),
        SearchRoot::SubmittedOnly => None,
    }
}

fn working_dir(task: &SimulationTask) -> Result<PathBuf, PipelineError> {
    task.working_dir()
        .map(Path::to_path_buf)
        .ok_or(PipelineError::MissingWorkingDir(task.kind()))
}

fn load_params<T: for<'de> serde::Deserialize<'de>>(path: &Path) -> Result<T, PipelineError> {
    load_json(path).map_err(|source| PipelineError::ParameterFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Re-reconstruction of the elastic sample with the IP cuts applied.
fn elastic_params(
    mut sim: SimulationParams,
    reco: ReconstructionParams,
    ip_offset: [f64; 3],
    num_samples: Option<u64>,
) -> (SimulationParams, AlignmentParams, ReconstructionParams) {
    let mut reco = reco.with_ip_cuts(ip_offset);
    if let Some(cap) = num_samples.filter(|&n| n > 0) {
        if reco.num_samples > cap {
            reco.num_samples = cap;
            sim.num_samples = cap;
        }
    }
    let alignment = AlignmentParams::from_reconstruction(&reco);
    (sim, alignment, reco)
}

/// Box-generator simulation covering the acceptance shifted by the IP offset.
fn box_params(
    general: &GeneralRunParams,
    ip_offset: [f64; 3],
    transverse_shift: f64,
) -> (SimulationParams, AlignmentParams, ReconstructionParams) {
    let mut sim = SimulationParams::box_generator();
    sim.widen_theta_range(round_to_places(transverse_shift, 2));
    sim.apply_general(general);

    let mut reco = ReconstructionParams::default().with_ip_cuts(ip_offset);
    reco.apply_general(general);

    (sim, AlignmentParams::default(), reco)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_box_params_widen_by_rounded_shift() {
        let general = GeneralRunParams::new(500_000, 100, 1.5);
        let (sim, alignment, reco) = box_params(&general, [0.3, 0.4, 0.1], 0.5049);

        assert_eq!(sim.sim_type, "box");
        assert!((sim.theta_min_in_mrad - (2.7 - 0.5)).abs() < 1e-9);
        assert!((sim.theta_max_in_mrad - (13.0 + 0.5)).abs() < 1e-9);
        assert_eq!(sim.num_samples, 100);
        assert_eq!(reco.num_events_per_sample, 500_000);
        assert!(reco.use_xy_cut && reco.use_m_cut);
        assert_eq!(reco.reco_ip_offset, [0.3, 0.4, 0.1]);
        assert_eq!(alignment, AlignmentParams::default());
    }

    #[test]
    fn test_elastic_params_caps_sample_count() {
        let sim: SimulationParams =
            serde_json::from_value(json!({"sim_type": "dpm", "num_samples": 500})).expect("sim");
        let reco: ReconstructionParams = serde_json::from_value(json!({
            "num_samples": 500,
            "misalignment_matrices_path": "/align/mis.json"
        }))
        .expect("reco");

        let (sim, alignment, reco) = elastic_params(sim, reco, [0.1, 0.0, -0.2], Some(100));
        assert_eq!(sim.num_samples, 100);
        assert_eq!(reco.num_samples, 100);
        assert_eq!(reco.reco_ip_offset, [0.1, 0.0, -0.2]);
        assert_eq!(
            alignment.misalignment_matrices_path.as_deref(),
            Some("/align/mis.json")
        );
    }

    #[test]
    fn test_elastic_params_keeps_smaller_or_unlimited_count() {
        let sim = SimulationParams::box_generator();
        let reco: ReconstructionParams =
            serde_json::from_value(json!({"num_samples": 50})).expect("reco");

        let (_, _, capped) = elastic_params(sim.clone(), reco.clone(), [0.0; 3], Some(100));
        assert_eq!(capped.num_samples, 50);

        let (_, _, all) = elastic_params(sim, reco, [0.0; 3], None);
        assert_eq!(all.num_samples, 50);
    }

    #[test]
    fn test_default_search_root() {
        let dir = Path::new("/data/plab_1.5GeV/dpm_elastic/1-10_uncut");
        assert_eq!(
            default_search_root(SearchRoot::ScenarioDir, dir),
            Some(dir.to_path_buf())
        );
        assert_eq!(default_search_root(SearchRoot::SubmittedOnly, dir), None);
    }

    #[test]
    fn test_task_outcome_display() {
        assert_eq!(TaskOutcome::Pending.to_string(), "pending");
        assert_eq!(TaskOutcome::Finished.to_string(), "finished");
        assert_eq!(TaskOutcome::Failed.to_string(), "failed");
    }
}
