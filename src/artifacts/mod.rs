//! Filesystem-side view of pipeline progress.
//!
//! Every stage of the pipeline decides what to do by looking at the files it
//! would produce, never at an in-memory ledger:
//!
//! - **probe**: READY / WAITING / FAILED verdict for a stage output directory
//! - **locator**: recursive search for directories by keywords and file names
//! - **bunching**: native file-list bunching of simulation output
//!
//! Re-running the pipeline after a crash re-derives all progress from these.

pub mod bunching;
pub mod locator;
pub mod probe;

pub use bunching::FileListBuncher;
pub use locator::DirectorySearcher;
pub use probe::{
    classify, expected_count_from_path, ArtifactProber, FileInventory, ProbePolicy, ProbeReport,
    ProbeStatus, DEFAULT_MIN_FILE_SIZE, DEFAULT_REQUIRED_FRACTION, SIMULATION_OUTPUT_GLOB,
};
