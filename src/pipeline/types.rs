//! Domain types of the scenario pipeline.
//!
//! - [`Scenario`]: one campaign directory moving through the four stages
//! - [`SimulationTask`]: a nested sub-job producing one kind of data
//! - [`SampleKind`] and its lookup table [`SampleKindSpec`]

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Filename prefix of simulation/reconstruction output.
pub const SIMULATION_OUTPUT_PREFIX: &str = "Lumi_TrksQA_";

/// Path keywords of merged data objects.
pub const MERGE_KEYWORDS: &[&str] = &["merge_data", "binning_300"];

/// Path keywords identifying scenario root directories.
pub const SCENARIO_KEYWORDS: &[&str] = &["dpm_elastic", "uncut"];

/// Kind of data a simulation task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleKind {
    /// Unfiltered vertex data, used to locate the interaction point.
    Vertex,
    /// Elastic angular data reconstructed with the IP offset applied.
    Angular,
    /// Box-generator data for acceptance and resolution.
    AcceptanceResolution,
}

impl SampleKind {
    /// Short code the lmdfit utilities use for this kind.
    pub fn code(self) -> &'static str {
        self.spec().code
    }

    /// Lookup-table entry of this kind.
    pub fn spec(self) -> &'static SampleKindSpec {
        match self {
            SampleKind::Vertex => &SAMPLE_KINDS[0],
            SampleKind::Angular => &SAMPLE_KINDS[1],
            SampleKind::AcceptanceResolution => &SAMPLE_KINDS[2],
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::Vertex => write!(f, "vertex"),
            SampleKind::Angular => write!(f, "angular"),
            SampleKind::AcceptanceResolution => write!(f, "acceptance-resolution"),
        }
    }
}

/// Where a task looks for pre-existing simulation output before it has a
/// working directory of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchRoot {
    /// The scenario directory itself.
    ScenarioDir,
    /// Nowhere; output is only looked for once a submission returned a
    /// directory. Sibling scenarios share a parent directory, so anything
    /// found there could belong to another scenario or another IP offset.
    SubmittedOnly,
}

/// Per-kind directory classification.
#[derive(Debug, Clone, Copy)]
pub struct SampleKindSpec {
    pub kind: SampleKind,
    pub code: &'static str,
    /// Path keywords of the simulation/reconstruction output directory.
    pub simulation_keywords: &'static [&'static str],
    /// Path keywords of the bunched data objects; the first one is the
    /// `--dir_pattern` passed to the utilities.
    pub data_keywords: &'static [&'static str],
    /// Filename prefix of the data objects.
    pub data_prefix: &'static str,
    pub search_root: SearchRoot,
    /// Whether this kind can be (re)simulated when no output exists.
    pub simulated: bool,
}

impl SampleKindSpec {
    pub fn dir_pattern(&self) -> &'static str {
        self.data_keywords[0]
    }
}

pub const SAMPLE_KINDS: [SampleKindSpec; 3] = [
    SampleKindSpec {
        kind: SampleKind::Vertex,
        code: "v",
        simulation_keywords: &["dpm_elastic", "uncut"],
        data_keywords: &["uncut", "bunches", "binning_300"],
        data_prefix: "lmd_vertex_data_",
        search_root: SearchRoot::ScenarioDir,
        simulated: false,
    },
    SampleKindSpec {
        kind: SampleKind::Angular,
        code: "a",
        simulation_keywords: &["dpm_elastic", "xy_m_cut"],
        data_keywords: &["xy_m_cut_real", "bunches", "binning_300"],
        data_prefix: "lmd_data_",
        search_root: SearchRoot::SubmittedOnly,
        simulated: true,
    },
    SampleKindSpec {
        kind: SampleKind::AcceptanceResolution,
        code: "er",
        simulation_keywords: &["box", "xy_m_cut"],
        data_keywords: &["xy_m_cut_real", "bunches", "binning_300"],
        data_prefix: "lmd_res_data_",
        search_root: SearchRoot::SubmittedOnly,
        simulated: true,
    },
];

/// Stage of a simulation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskStage {
    /// Submit the simulation or detect its existing output.
    Simulate,
    /// Bunch the output and build data objects.
    BuildDataObjects,
    /// Merge the data objects.
    Merge,
    /// Terminal.
    Done,
}

impl TaskStage {
    pub fn number(self) -> u8 {
        match self {
            TaskStage::Simulate => 1,
            TaskStage::BuildDataObjects => 2,
            TaskStage::Merge => 3,
            TaskStage::Done => 4,
        }
    }

    fn next(self) -> Self {
        match self {
            TaskStage::Simulate => TaskStage::BuildDataObjects,
            TaskStage::BuildDataObjects => TaskStage::Merge,
            TaskStage::Merge | TaskStage::Done => TaskStage::Done,
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStage::Simulate => write!(f, "simulate"),
            TaskStage::BuildDataObjects => write!(f, "build-data-objects"),
            TaskStage::Merge => write!(f, "merge"),
            TaskStage::Done => write!(f, "done"),
        }
    }
}

/// Identity of a task within its scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A simulation/reconstruction sub-job owned by a scenario.
///
/// `last_attempt` records the highest stage whose work was already started,
/// so a stage is only kicked off once and later ticks just look for its
/// output.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationTask {
    id: TaskId,
    kind: SampleKind,
    working_dir: Option<PathBuf>,
    stage: TaskStage,
    last_attempt: Option<TaskStage>,
    /// Job count of this task's own submission, if it made one.
    submitted_jobs: Option<usize>,
    failed: bool,
}

impl SimulationTask {
    pub fn new(id: TaskId, kind: SampleKind, working_dir: Option<PathBuf>) -> Self {
        Self {
            id,
            kind,
            working_dir,
            stage: TaskStage::Simulate,
            last_attempt: None,
            submitted_jobs: None,
            failed: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn stage(&self) -> TaskStage {
        self.stage
    }

    pub fn submitted_jobs(&self) -> Option<usize> {
        self.submitted_jobs
    }

    /// Numeric sub-stage: `-1` once failed, otherwise the number of the last
    /// attempted stage (0 before any attempt).
    pub fn sub_stage(&self) -> i8 {
        if self.failed {
            -1
        } else {
            self.last_attempt.map_or(0, |s| s.number() as i8)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_done(&self) -> bool {
        self.stage == TaskStage::Done
    }

    /// True when the work of the current stage has not been started yet.
    pub fn needs_attempt(&self) -> bool {
        self.last_attempt < Some(self.stage)
    }

    pub(crate) fn set_working_dir(&mut self, dir: PathBuf) {
        self.working_dir = Some(dir);
    }

    pub(crate) fn set_submitted_jobs(&mut self, jobs: usize) {
        self.submitted_jobs = Some(jobs);
    }

    pub(crate) fn mark_attempted(&mut self) {
        self.last_attempt = Some(self.stage);
    }

    /// Marks the current stage as complete and moves to the next one.
    pub(crate) fn complete_stage(&mut self) {
        self.last_attempt = Some(self.stage);
        self.stage = self.stage.next();
    }

    pub(crate) fn fail(&mut self) {
        self.failed = true;
    }
}

/// Stage of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScenarioStage {
    /// Build vertex data objects.
    VertexData,
    /// Determine the interaction-point offset.
    IpOffset,
    /// Build angular and acceptance/resolution data.
    AngularAndAcceptance,
    /// Run the luminosity fit.
    Fit,
}

impl ScenarioStage {
    pub fn number(self) -> u8 {
        match self {
            ScenarioStage::VertexData => 1,
            ScenarioStage::IpOffset => 2,
            ScenarioStage::AngularAndAcceptance => 3,
            ScenarioStage::Fit => 4,
        }
    }

    fn next(self) -> Self {
        match self {
            ScenarioStage::VertexData => ScenarioStage::IpOffset,
            ScenarioStage::IpOffset => ScenarioStage::AngularAndAcceptance,
            ScenarioStage::AngularAndAcceptance | ScenarioStage::Fit => ScenarioStage::Fit,
        }
    }
}

impl fmt::Display for ScenarioStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioStage::VertexData => write!(f, "vertex-data"),
            ScenarioStage::IpOffset => write!(f, "ip-offset"),
            ScenarioStage::AngularAndAcceptance => write!(f, "angular-and-acceptance"),
            ScenarioStage::Fit => write!(f, "fit"),
        }
    }
}

/// Interaction-point offset in cm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IpOffset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Rounds to `places` decimals through the decimal representation, so that
/// `1.2345` becomes `1.234` as printed by `{:.3}`.
pub fn round_to_places(value: f64, places: usize) -> f64 {
    format!("{:.*}", places, value).parse().unwrap_or(value)
}

impl IpOffset {
    /// Offset with every component rounded to 3 decimals.
    pub fn rounded(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: round_to_places(x, 3),
            y: round_to_places(y, 3),
            z: round_to_places(z, 3),
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Transverse displacement `sqrt(x² + y²)`.
    pub fn transverse(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// One simulation campaign rooted at a directory.
#[derive(Debug, Clone)]
pub struct Scenario {
    root: PathBuf,
    lab_momentum: Option<f64>,
    ip_offset: Option<IpOffset>,
    elastic_cross_section: Option<f64>,
    cross_section_checked: bool,
    stage: ScenarioStage,
    previous_stage: Option<ScenarioStage>,
    acceptance_dir: Option<PathBuf>,
    filtered_dir: Option<PathBuf>,
    pending_tasks: BTreeMap<TaskId, SimulationTask>,
    next_task_id: u32,
    broken: bool,
    finished: bool,
}

impl Scenario {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lab_momentum: None,
            ip_offset: None,
            elastic_cross_section: None,
            cross_section_checked: false,
            stage: ScenarioStage::VertexData,
            previous_stage: None,
            acceptance_dir: None,
            filtered_dir: None,
            pending_tasks: BTreeMap::new(),
            next_task_id: 0,
            broken: false,
            finished: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lab_momentum(&self) -> Option<f64> {
        self.lab_momentum
    }

    pub fn ip_offset(&self) -> Option<IpOffset> {
        self.ip_offset
    }

    pub fn elastic_cross_section(&self) -> Option<f64> {
        self.elastic_cross_section
    }

    pub fn stage(&self) -> ScenarioStage {
        self.stage
    }

    pub fn previous_stage(&self) -> Option<ScenarioStage> {
        self.previous_stage
    }

    pub fn acceptance_dir(&self) -> Option<&Path> {
        self.acceptance_dir.as_deref()
    }

    pub fn filtered_dir(&self) -> Option<&Path> {
        self.filtered_dir.as_deref()
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = &SimulationTask> {
        self.pending_tasks.values()
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.pending_tasks.is_empty()
    }

    pub(crate) fn set_lab_momentum(&mut self, momentum: f64) {
        self.lab_momentum = Some(momentum);
    }

    /// Records the IP offset. The first value sticks; later calls are
    /// ignored and return `false`.
    pub(crate) fn set_ip_offset(&mut self, offset: IpOffset) -> bool {
        if self.ip_offset.is_some() {
            return false;
        }
        self.ip_offset = Some(offset);
        true
    }

    pub(crate) fn cross_section_checked(&self) -> bool {
        self.cross_section_checked
    }

    pub(crate) fn set_elastic_cross_section(&mut self, cross_section: Option<f64>) {
        self.elastic_cross_section = cross_section;
        self.cross_section_checked = true;
    }

    pub(crate) fn set_acceptance_dir(&mut self, dir: PathBuf) {
        self.acceptance_dir = Some(dir);
    }

    pub(crate) fn set_filtered_dir(&mut self, dir: PathBuf) {
        self.filtered_dir = Some(dir);
    }

    pub(crate) fn spawn_task(&mut self, kind: SampleKind, working_dir: Option<PathBuf>) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        self.pending_tasks
            .insert(id, SimulationTask::new(id, kind, working_dir));
        id
    }

    pub(crate) fn task_ids(&self) -> Vec<TaskId> {
        self.pending_tasks.keys().copied().collect()
    }

    pub(crate) fn take_task(&mut self, id: TaskId) -> Option<SimulationTask> {
        self.pending_tasks.remove(&id)
    }

    pub(crate) fn restore_task(&mut self, task: SimulationTask) {
        self.pending_tasks.insert(task.id(), task);
    }

    pub(crate) fn advance_stage(&mut self) {
        self.previous_stage = Some(self.stage);
        self.stage = self.stage.next();
    }

    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_kind_table_lookup() {
        assert_eq!(SampleKind::Vertex.code(), "v");
        assert_eq!(SampleKind::Angular.code(), "a");
        assert_eq!(SampleKind::AcceptanceResolution.code(), "er");
        for spec in &SAMPLE_KINDS {
            assert_eq!(spec.kind.spec().code, spec.code);
        }
        assert_eq!(SampleKind::Angular.spec().dir_pattern(), "xy_m_cut_real");
        assert_eq!(
            SampleKind::AcceptanceResolution.spec().data_prefix,
            "lmd_res_data_"
        );
        assert!(!SampleKind::Vertex.spec().simulated);
        assert_eq!(SampleKind::Vertex.spec().search_root, SearchRoot::ScenarioDir);
        assert_eq!(SampleKind::Angular.spec().search_root, SearchRoot::SubmittedOnly);
        assert_eq!(
            SampleKind::AcceptanceResolution.spec().search_root,
            SearchRoot::SubmittedOnly
        );
    }

    #[test]
    fn test_task_stage_progression() {
        let mut task = SimulationTask::new(TaskId(0), SampleKind::Angular, None);
        assert_eq!(task.stage(), TaskStage::Simulate);
        assert!(task.needs_attempt());
        assert_eq!(task.sub_stage(), 0);
        assert_eq!(task.submitted_jobs(), None);

        task.set_submitted_jobs(50);
        assert_eq!(task.submitted_jobs(), Some(50));

        task.mark_attempted();
        assert!(!task.needs_attempt());
        assert_eq!(task.sub_stage(), 1);

        task.complete_stage();
        assert_eq!(task.stage(), TaskStage::BuildDataObjects);
        assert!(task.needs_attempt());

        task.complete_stage();
        task.complete_stage();
        assert!(task.is_done());
        task.complete_stage();
        assert!(task.is_done());
    }

    #[test]
    fn test_task_failure_sub_stage() {
        let mut task = SimulationTask::new(TaskId(3), SampleKind::Vertex, None);
        task.fail();
        assert!(task.is_failed());
        assert_eq!(task.sub_stage(), -1);
    }

    #[test]
    fn test_scenario_ip_offset_written_once() {
        let mut scenario = Scenario::new("/data/1-10_uncut");
        let first = IpOffset { x: 0.1, y: 0.2, z: 0.3 };
        assert!(scenario.set_ip_offset(first));
        assert!(!scenario.set_ip_offset(IpOffset { x: 9.0, y: 9.0, z: 9.0 }));
        assert_eq!(scenario.ip_offset(), Some(first));
    }

    #[test]
    fn test_scenario_task_bookkeeping() {
        let mut scenario = Scenario::new("/data/1-10_uncut");
        let a = scenario.spawn_task(SampleKind::Angular, None);
        let b = scenario.spawn_task(SampleKind::AcceptanceResolution, None);
        assert_ne!(a, b);
        assert_eq!(scenario.task_ids(), vec![a, b]);

        let task = scenario.take_task(a).expect("task");
        assert_eq!(scenario.task_ids(), vec![b]);
        scenario.restore_task(task);
        assert_eq!(scenario.pending_tasks().count(), 2);
    }

    #[test]
    fn test_scenario_stage_advance() {
        let mut scenario = Scenario::new("/data");
        assert_eq!(scenario.stage(), ScenarioStage::VertexData);
        scenario.advance_stage();
        assert_eq!(scenario.stage(), ScenarioStage::IpOffset);
        assert_eq!(scenario.previous_stage(), Some(ScenarioStage::VertexData));
        assert_eq!(scenario.stage().number(), 2);
    }

    #[test]
    fn test_round_to_places() {
        assert_eq!(round_to_places(1.2345, 3), 1.234);
        assert_eq!(round_to_places(-0.0514, 3), -0.051);
        assert_eq!(round_to_places(0.505, 2), 0.51);
        let offset = IpOffset::rounded(1.2345, 0.00049, -2.0);
        assert_eq!(offset.as_array(), [1.234, 0.0, -2.0]);
    }

    #[test]
    fn test_ip_offset_transverse() {
        let offset = IpOffset { x: 0.3, y: 0.4, z: 1.0 };
        assert!((offset.transverse() - 0.5).abs() < 1e-12);
        assert_eq!(offset.as_array(), [0.3, 0.4, 1.0]);
    }
}
