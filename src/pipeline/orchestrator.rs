//! Scenario orchestrator driving one campaign directory through its stages.
//!
//! The `ScenarioOrchestrator` advances a [`Scenario`] by one tick:
//! - Vertex data: one vertex task, driven by the [`TaskRunner`]
//! - Interaction point: read or determine `reco_ip.json`, synchronously
//! - Angular and acceptance data: two tasks driven side by side
//! - Fit: run the luminosity fit unless its output already exists
//!
//! Within one tick a scenario falls through every stage whose prerequisites
//! are already on disk.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifacts::DirectorySearcher;
use crate::error::{ProbeError, ToolError};
use crate::tools::lmdfit::RECO_IP_FILE;
use crate::tools::{FitRequest, Toolchain};

use super::config::{ConfigError, PipelineConfig};
use super::runner::{TaskOutcome, TaskRunner};
use super::types::{
    IpOffset, SampleKind, Scenario, ScenarioStage, MERGE_KEYWORDS, SCENARIO_KEYWORDS,
    SIMULATION_OUTPUT_PREFIX,
};

/// Integrated elastic cross section, stored next to the scenario directory.
pub const CROSS_SECTION_FILE: &str = "elastic_cross_section.txt";

/// Filename marker of fit results.
pub const FITTED_DATA_PREFIX: &str = "lmd_fitted_data";

/// Filename marker of the first merged vertex data object.
const MERGED_VERTEX_MARKER: &str = "of1.root";

/// Errors that can occur while processing a scenario.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// External program failed.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Artifact probing failed.
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// No `<number>GeV` segment in the scenario path.
    #[error("Cannot parse lab momentum from {0}")]
    LabMomentum(PathBuf),

    /// A persisted parameter file is missing or malformed.
    #[error("Cannot read parameter file {path}: {source}")]
    ParameterFile {
        path: PathBuf,
        #[source]
        source: ToolError,
    },

    /// The cross section file exists but cannot be parsed.
    #[error("Invalid cross section file {path}: {message}")]
    CrossSection { path: PathBuf, message: String },

    /// `reco_ip.json` lacks a numeric coordinate.
    #[error("Invalid interaction point file {path}: {message}")]
    InvalidIpOffset { path: PathBuf, message: String },

    /// No merged vertex data to determine the interaction point from.
    #[error("No merged vertex data under {0}")]
    NoMergedVertexData(PathBuf),

    /// A later stage ran before the interaction point was known.
    #[error("Interaction point offset not determined for {0}")]
    MissingIpOffset(PathBuf),

    /// The fit ran before both sample directories were known.
    #[error("Missing {kind} output directory for {scenario}")]
    MissingSampleDir { scenario: PathBuf, kind: SampleKind },

    /// A task reached a stage that needs its output directory without one.
    #[error("No working directory for {0} task")]
    MissingWorkingDir(SampleKind),

    /// Submission was requested for a kind that is never simulated.
    #[error("{0} data is never simulated")]
    NotSimulated(SampleKind),
}

impl PipelineError {
    /// Whether the error means the input tree itself is invalid and the whole
    /// run must stop, rather than only the scenario that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Config(_)
                | PipelineError::LabMomentum(_)
                | PipelineError::ParameterFile { .. }
                | PipelineError::CrossSection { .. }
        )
    }
}

/// Result of one scenario tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// Unfinished; retry next round.
    Pending,
    /// The fit stage completed.
    Finished,
    /// A task failed; the scenario must not be scheduled again.
    Broken,
}

impl std::fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioOutcome::Pending => write!(f, "pending"),
            ScenarioOutcome::Finished => write!(f, "finished"),
            ScenarioOutcome::Broken => write!(f, "broken"),
        }
    }
}

fn momentum_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d*?\.\d*?)GeV").expect("Invalid regex for lab momentum"))
}

/// Parses the lab momentum from a `<number>GeV` path segment.
pub fn parse_lab_momentum(path: &Path) -> Option<f64> {
    let path = path.to_string_lossy();
    momentum_regex()
        .captures(&path)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Finds the scenario directories under `base`.
pub fn discover_scenarios(base: &Path) -> Vec<PathBuf> {
    DirectorySearcher::new(SCENARIO_KEYWORDS.iter().copied())
        .search(base, &[SIMULATION_OUTPUT_PREFIX])
}

/// Reads the first line of the cross section file as a float.
pub fn read_cross_section(path: &Path) -> Result<f64, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::CrossSection {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let first = content.lines().next().unwrap_or("").trim();
    first.parse().map_err(|_| PipelineError::CrossSection {
        path: path.to_path_buf(),
        message: format!("'{}' is not a number", first),
    })
}

fn coordinate(data: &Value, key: &str) -> Option<f64> {
    match data.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads `ip_x`, `ip_y`, `ip_z` (cm) from a `reco_ip.json` file, rounded to
/// 3 decimals.
pub fn read_ip_offset(path: &Path) -> Result<IpOffset, PipelineError> {
    let invalid = |message: String| PipelineError::InvalidIpOffset {
        path: path.to_path_buf(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let data: Value = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

    let mut values = [0.0; 3];
    for (value, key) in values.iter_mut().zip(["ip_x", "ip_y", "ip_z"]) {
        *value = coordinate(&data, key).ok_or_else(|| invalid(format!("missing {}", key)))?;
    }
    Ok(IpOffset::rounded(values[0], values[1], values[2]))
}

/// Advances scenarios one tick at a time.
#[derive(Debug, Clone)]
pub struct ScenarioOrchestrator {
    config: PipelineConfig,
    tools: Toolchain,
    runner: TaskRunner,
}

impl ScenarioOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(config: PipelineConfig, tools: Toolchain) -> Self {
        let runner = TaskRunner::new(tools.clone(), config.clone());
        Self {
            config,
            tools,
            runner,
        }
    }

    /// Advances `scenario` by one tick.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if a stage cannot be carried out. Errors for
    /// which [`PipelineError::is_fatal`] holds invalidate the whole run.
    pub async fn tick(&self, scenario: &mut Scenario) -> Result<ScenarioOutcome, PipelineError> {
        if scenario.is_finished() {
            return Ok(ScenarioOutcome::Finished);
        }
        self.load_scenario_inputs(scenario)?;

        info!(
            scenario = %scenario.root().display(),
            stage = %scenario.stage(),
            "Processing scenario"
        );

        if scenario.stage() == ScenarioStage::VertexData {
            if !scenario.has_pending_tasks() {
                let root = scenario.root().to_path_buf();
                scenario.spawn_task(SampleKind::Vertex, Some(root));
            }
            if !self.drive_tasks(scenario).await? {
                return Ok(ScenarioOutcome::Broken);
            }
            if !scenario.has_pending_tasks() {
                scenario.advance_stage();
            }
        }

        if scenario.stage() == ScenarioStage::IpOffset {
            self.determine_ip_offset(scenario).await?;
            scenario.advance_stage();
        }

        if scenario.stage() == ScenarioStage::AngularAndAcceptance {
            if !scenario.has_pending_tasks() {
                scenario.spawn_task(SampleKind::Angular, None);
                scenario.spawn_task(SampleKind::AcceptanceResolution, None);
            }
            if !self.drive_tasks(scenario).await? {
                return Ok(ScenarioOutcome::Broken);
            }
            if !scenario.has_pending_tasks() {
                scenario.advance_stage();
            }
        }

        if scenario.stage() == ScenarioStage::Fit {
            self.fit(scenario).await?;
            scenario.mark_finished();
            info!(scenario = %scenario.root().display(), "Scenario fully processed");
            return Ok(ScenarioOutcome::Finished);
        }

        Ok(ScenarioOutcome::Pending)
    }

    /// Momentum and cross section are read on the first tick only.
    fn load_scenario_inputs(&self, scenario: &mut Scenario) -> Result<(), PipelineError> {
        if scenario.lab_momentum().is_none() {
            let momentum = parse_lab_momentum(scenario.root())
                .ok_or_else(|| PipelineError::LabMomentum(scenario.root().to_path_buf()))?;
            scenario.set_lab_momentum(momentum);
        }

        if !scenario.cross_section_checked() {
            let path = scenario
                .root()
                .parent()
                .unwrap_or(scenario.root())
                .join(CROSS_SECTION_FILE);
            let cross_section = if path.is_file() {
                let value = read_cross_section(&path)?;
                info!(path = %path.display(), value, "Found elastic cross section file");
                Some(value)
            } else {
                None
            };
            scenario.set_elastic_cross_section(cross_section);
        }
        Ok(())
    }

    /// Advances every pending task once. Returns `false` when a task failed;
    /// the remaining tasks are left untouched for this tick.
    async fn drive_tasks(&self, scenario: &mut Scenario) -> Result<bool, PipelineError> {
        for id in scenario.task_ids() {
            let Some(task) = scenario.take_task(id) else {
                continue;
            };
            let (task, outcome) = self.runner.advance(task, scenario).await?;

            if let Some(dir) = task.working_dir() {
                match task.kind() {
                    SampleKind::Angular => scenario.set_filtered_dir(dir.to_path_buf()),
                    SampleKind::AcceptanceResolution => {
                        scenario.set_acceptance_dir(dir.to_path_buf())
                    }
                    SampleKind::Vertex => {}
                }
            }

            debug!(task = %id, kind = %task.kind(), %outcome, "Task advanced");
            match outcome {
                TaskOutcome::Finished => {}
                TaskOutcome::Pending => scenario.restore_task(task),
                TaskOutcome::Failed => {
                    scenario.restore_task(task);
                    scenario.mark_broken();
                    warn!(
                        scenario = %scenario.root().display(),
                        task = %id,
                        "Simulation task failed, giving up on scenario"
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn determine_ip_offset(&self, scenario: &mut Scenario) -> Result<(), PipelineError> {
        let searcher = DirectorySearcher::new(MERGE_KEYWORDS.iter().copied());
        let ip_file = match searcher.find_first(scenario.root(), &[RECO_IP_FILE]) {
            Some(dir) => {
                debug!(dir = %dir.display(), "Interaction point already determined");
                dir.join(RECO_IP_FILE)
            }
            None => {
                let vertex_prefix = SampleKind::Vertex.spec().data_prefix;
                let merged = searcher
                    .find_first(scenario.root(), &[vertex_prefix, MERGED_VERTEX_MARKER])
                    .ok_or_else(|| {
                        PipelineError::NoMergedVertexData(scenario.root().to_path_buf())
                    })?;
                self.tools
                    .offset_estimator
                    .estimate(&merged, &self.config.vertex_fit_config_path())
                    .await?
            }
        };

        let offset = read_ip_offset(&ip_file)?;
        if scenario.set_ip_offset(offset) {
            info!(
                scenario = %scenario.root().display(),
                x = offset.x,
                y = offset.y,
                z = offset.z,
                "Finished interaction point determination"
            );
        }
        Ok(())
    }

    async fn fit(&self, scenario: &Scenario) -> Result<(), PipelineError> {
        let missing = |kind| PipelineError::MissingSampleDir {
            scenario: scenario.root().to_path_buf(),
            kind,
        };
        let filtered = scenario
            .filtered_dir()
            .ok_or_else(|| missing(SampleKind::Angular))?;
        let acceptance = scenario
            .acceptance_dir()
            .ok_or_else(|| missing(SampleKind::AcceptanceResolution))?;

        let searcher = DirectorySearcher::new(MERGE_KEYWORDS.iter().copied());
        if searcher.find_first(filtered, &[FITTED_DATA_PREFIX]).is_some() {
            info!(dir = %filtered.display(), "Fit results exist, skipping fit");
            return Ok(());
        }

        info!(scenario = %scenario.root().display(), "Running luminosity fit");
        let fit_config = self.config.fit_config_path();
        self.tools
            .fitter
            .fit(&FitRequest {
                acceptance_dir: acceptance,
                filtered_dir: filtered,
                dir_pattern: SampleKind::Angular.spec().dir_pattern(),
                fit_config: &fit_config,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_lab_momentum() {
        assert_eq!(
            parse_lab_momentum(Path::new("/data/plab_1.5GeV/dpm_elastic/1-10_uncut")),
            Some(1.5)
        );
        assert_eq!(
            parse_lab_momentum(Path::new("/data/plab_15.0GeV/dpm_elastic")),
            Some(15.0)
        );
        assert_eq!(parse_lab_momentum(Path::new("/data/plab_15GeV")), None);
        assert_eq!(parse_lab_momentum(Path::new("/data/dpm_elastic")), None);
    }

    #[test]
    fn test_read_ip_offset_rounds_to_three_decimals() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join(RECO_IP_FILE);
        std::fs::write(&path, r#"{"ip_x": 1.2345, "ip_y": "-0.0514", "ip_z": 0.3}"#)
            .expect("write");

        let offset = read_ip_offset(&path).expect("offset");
        assert_eq!(offset.x, 1.234);
        assert_eq!(offset.y, -0.051);
        assert_eq!(offset.z, 0.3);
    }

    #[test]
    fn test_read_ip_offset_rejects_missing_coordinate() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join(RECO_IP_FILE);
        std::fs::write(&path, r#"{"ip_x": 1.0, "ip_y": 2.0}"#).expect("write");

        let err = read_ip_offset(&path).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidIpOffset { .. }));
        assert!(err.to_string().contains("ip_z"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_read_cross_section() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join(CROSS_SECTION_FILE);
        std::fs::write(&path, "3.85\n4.0\n").expect("write");
        assert_eq!(read_cross_section(&path).expect("cross section"), 3.85);

        std::fs::write(&path, "n/a\n").expect("write");
        let err = read_cross_section(&path).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_discover_scenarios() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let scenario = dir.path().join("plab_1.5GeV/dpm_elastic/1-10_uncut");
        let other = dir.path().join("plab_1.5GeV/box/1-10_uncut");
        for d in [&scenario, &other] {
            std::fs::create_dir_all(d).expect("mkdir");
            std::fs::write(d.join("Lumi_TrksQA_1.root"), b"x").expect("write");
        }
        std::fs::create_dir_all(dir.path().join("plab_1.5GeV/dpm_elastic/empty_uncut"))
            .expect("mkdir");

        assert_eq!(discover_scenarios(dir.path()), vec![scenario]);
    }

    #[test]
    fn test_pipeline_error_fatality() {
        assert!(PipelineError::LabMomentum(PathBuf::from("/x")).is_fatal());
        assert!(PipelineError::Config(ConfigError::MissingEnvVar("X".into())).is_fatal());
        assert!(!PipelineError::NoMergedVertexData(PathBuf::from("/x")).is_fatal());
        assert!(!PipelineError::Tool(ToolError::NonZeroExit {
            tool: "merge".into(),
            code: 1,
            stderr: String::new(),
        })
        .is_fatal());

        let err = PipelineError::MissingSampleDir {
            scenario: PathBuf::from("/data/s"),
            kind: SampleKind::AcceptanceResolution,
        };
        assert!(err.to_string().contains("acceptance-resolution"));
    }

    #[test]
    fn test_scenario_outcome_display() {
        assert_eq!(ScenarioOutcome::Broken.to_string(), "broken");
        assert_eq!(ScenarioOutcome::Finished.to_string(), "finished");
    }
}
