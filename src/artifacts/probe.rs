//! Artifact prober: decides whether a stage's output is complete.
//!
//! A stage is READY when enough "good" output files exist, WAITING when it is
//! not yet complete but the batch scheduler still has work queued, and FAILED
//! when the scheduler is idle and the output is still missing. The verdict is
//! re-derived on every call because the scheduler state moves between ticks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::scheduler::JobQueue;

/// Fraction of expected files that must be present for a stage to count as
/// complete. Tolerates a few lost batch jobs.
pub const DEFAULT_REQUIRED_FRACTION: f64 = 0.8;

/// Files at or below this size (in bytes) are treated as broken output.
pub const DEFAULT_MIN_FILE_SIZE: u64 = 20_000;

/// Glob matching the per-job simulation/reconstruction output files.
pub const SIMULATION_OUTPUT_GLOB: &str = "Lumi_TrksQA_*.root";

/// Verdict of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Enough output exists; the stage is complete.
    Ready,
    /// Output incomplete, but the scheduler still has queued jobs.
    Waiting,
    /// Output incomplete and the scheduler is idle.
    Failed,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Ready => write!(f, "READY"),
            ProbeStatus::Waiting => write!(f, "WAITING"),
            ProbeStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Thresholds used when classifying output files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbePolicy {
    /// Required fraction of good files relative to the expected count.
    pub required_fraction: f64,
    /// Minimum size (exclusive) for a file to count as good.
    pub min_file_size: u64,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            required_fraction: DEFAULT_REQUIRED_FRACTION,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
        }
    }
}

/// Files found for a pattern, split by the size threshold.
#[derive(Debug, Clone, Default)]
pub struct FileInventory {
    pub good: Vec<PathBuf>,
    pub bad: Vec<PathBuf>,
}

impl FileInventory {
    /// Lists the regular files in `dir` matching `pattern` and partitions them
    /// into good (larger than `min_file_size`) and bad.
    ///
    /// A missing directory yields an empty inventory.
    pub fn collect(dir: &Path, pattern: &str, min_file_size: u64) -> Result<Self, ProbeError> {
        let full_pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            pattern
        );
        let paths = glob::glob(&full_pattern).map_err(|e| ProbeError::InvalidPattern {
            pattern: full_pattern.clone(),
            message: e.msg.to_string(),
        })?;

        let mut inventory = Self::default();
        for entry in paths {
            let path = entry.map_err(|e| ProbeError::Io(e.into_error()))?;
            let metadata = std::fs::metadata(&path)?;
            if !metadata.is_file() {
                continue;
            }
            if metadata.len() > min_file_size {
                inventory.good.push(path);
            } else {
                inventory.bad.push(path);
            }
        }
        inventory.good.sort();
        inventory.bad.sort();
        Ok(inventory)
    }
}

fn job_range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d+?)-(\d+?)_.+?cut").expect("Invalid regex for job range"))
}

/// Extracts the number of simulation jobs encoded in a directory path as a
/// `/<start>-<end>_...cut` segment (inclusive range).
pub fn expected_count_from_path(dir: &Path) -> Option<usize> {
    let path = dir.to_string_lossy();
    let captures = job_range_regex().captures(&path)?;
    let start: usize = captures.get(1)?.as_str().parse().ok()?;
    let end: usize = captures.get(2)?.as_str().parse().ok()?;
    end.checked_sub(start).map(|span| span + 1)
}

/// Pure three-way classification.
///
/// READY iff `good >= required_fraction * expected`; otherwise WAITING iff the
/// scheduler reports pending jobs; otherwise FAILED.
pub fn classify(
    good: usize,
    expected: usize,
    pending_jobs: usize,
    required_fraction: f64,
) -> ProbeStatus {
    if good as f64 >= required_fraction * expected as f64 {
        ProbeStatus::Ready
    } else if pending_jobs > 0 {
        ProbeStatus::Waiting
    } else {
        ProbeStatus::Failed
    }
}

/// Outcome of probing one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub status: ProbeStatus,
    pub good: usize,
    pub bad: usize,
    pub expected: usize,
    /// Scheduler queue depth; only queried when the output was incomplete.
    pub pending_jobs: Option<usize>,
}

/// Probes stage output directories against a [`ProbePolicy`].
#[derive(Debug, Clone, Default)]
pub struct ArtifactProber {
    policy: ProbePolicy,
}

impl ArtifactProber {
    pub fn new(policy: ProbePolicy) -> Self {
        Self { policy }
    }

    /// Probes `dir` for files matching `pattern`.
    ///
    /// The expected count comes from the directory name; `job_count` is used
    /// when the name carries no job range.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError` if the expected count cannot be derived, the
    /// directory cannot be listed, or the scheduler query fails.
    pub async fn probe(
        &self,
        dir: &Path,
        pattern: &str,
        job_count: Option<usize>,
        queue: &dyn JobQueue,
    ) -> Result<ProbeReport, ProbeError> {
        let expected = expected_count_from_path(dir)
            .or(job_count)
            .ok_or_else(|| ProbeError::UnknownExpectedCount(dir.to_path_buf()))?;
        let inventory = FileInventory::collect(dir, pattern, self.policy.min_file_size)?;
        let good = inventory.good.len();

        let mut pending_jobs = None;
        let status = if classify(good, expected, 0, self.policy.required_fraction)
            == ProbeStatus::Ready
        {
            ProbeStatus::Ready
        } else {
            warn!(
                dir = %dir.display(),
                good,
                expected,
                "More than {:.0}% of simulation files missing",
                (1.0 - self.policy.required_fraction) * 100.0
            );
            let pending = queue.pending_job_count().await?;
            pending_jobs = Some(pending);
            classify(good, expected, pending, self.policy.required_fraction)
        };

        debug!(
            dir = %dir.display(),
            %status,
            good,
            bad = inventory.bad.len(),
            expected,
            "Probed artifacts"
        );

        Ok(ProbeReport {
            status,
            good,
            bad: inventory.bad.len(),
            expected,
            pending_jobs,
        })
    }
}
