//! Native file-list bunching.
//!
//! Groups the good simulation output files of every matching directory into
//! `filelist_<i>.txt` batches under `<dir>/bunches_<n>`, which the data-object
//! construction utility consumes one list per batch job.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::locator::DirectorySearcher;
use super::probe::{FileInventory, DEFAULT_MIN_FILE_SIZE, SIMULATION_OUTPUT_GLOB};
use crate::error::{ProbeError, ToolError};
use crate::pipeline::types::SIMULATION_OUTPUT_PREFIX;
use crate::tools::{BunchRequest, BunchSummary, BunchedDirectory, Buncher};

/// Writes file-list bunches directly on the filesystem.
#[derive(Debug, Clone)]
pub struct FileListBuncher {
    min_file_size: u64,
}

impl Default for FileListBuncher {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FILE_SIZE)
    }
}

impl FileListBuncher {
    pub fn new(min_file_size: u64) -> Self {
        Self { min_file_size }
    }

    fn bunch_directory(
        &self,
        dir: &Path,
        files_per_bunch: usize,
        max_files: Option<usize>,
    ) -> Result<BunchedDirectory, ToolError> {
        let inventory = FileInventory::collect(dir, SIMULATION_OUTPUT_GLOB, self.min_file_size)
            .map_err(|e| match e {
                ProbeError::Io(io) => ToolError::Io(io),
                other => ToolError::InvalidOutput {
                    tool: "bunching".to_string(),
                    message: other.to_string(),
                },
            })?;

        if inventory.good.len() < inventory.bad.len() {
            warn!(
                dir = %dir.display(),
                good = inventory.good.len(),
                bad = inventory.bad.len(),
                "Found more bad than good files"
            );
        }

        let mut good = inventory.good;
        if let Some(max) = max_files {
            good.truncate(max);
        }

        let num_bunches = good.len().div_ceil(files_per_bunch);
        let bunch_dir = dir.join(format!("bunches_{}", num_bunches));
        fs::create_dir_all(&bunch_dir)?;

        for (index, chunk) in good.chunks(files_per_bunch).enumerate() {
            write_file_list(&bunch_dir.join(format!("filelist_{}.txt", index + 1)), chunk)?;
        }

        Ok(BunchedDirectory {
            dir: dir.to_path_buf(),
            bunch_dir,
            lists: num_bunches,
            good: good.len(),
            bad: inventory.bad.len(),
        })
    }
}

fn write_file_list(path: &Path, files: &[PathBuf]) -> Result<(), ToolError> {
    let mut file = fs::File::create(path)?;
    for entry in files {
        writeln!(file, "{}", entry.display())?;
    }
    Ok(())
}

impl Buncher for FileListBuncher {
    fn bunch(&self, request: &BunchRequest<'_>) -> Result<BunchSummary, ToolError> {
        if request.files_per_bunch == 0 {
            return Err(ToolError::InvalidOutput {
                tool: "bunching".to_string(),
                message: "files_per_bunch must be positive".to_string(),
            });
        }

        let searcher = DirectorySearcher::new(request.dir_keywords.iter().copied());
        let mut summary = BunchSummary::default();
        for dir in searcher.search(request.root, &[SIMULATION_OUTPUT_PREFIX]) {
            let bunched =
                self.bunch_directory(&dir, request.files_per_bunch, request.max_files)?;
            info!(
                dir = %bunched.dir.display(),
                lists = bunched.lists,
                bad = bunched.bad,
                "Created file list bunches"
            );
            summary.directories.push(bunched);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_outputs(dir: &Path, good: usize, bad: usize) {
        fs::create_dir_all(dir).expect("create dir");
        for i in 0..good {
            fs::write(dir.join(format!("Lumi_TrksQA_{}.root", i)), vec![1u8; 20_001])
                .expect("write good file");
        }
        for i in good..good + bad {
            fs::write(dir.join(format!("Lumi_TrksQA_{}.root", i)), b"tiny").expect("write");
        }
    }

    #[test]
    fn test_bunch_splits_good_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("1-25_uncut");
        write_outputs(&dir, 23, 2);

        let request = BunchRequest {
            root: temp_dir.path(),
            dir_keywords: &["uncut"],
            files_per_bunch: 10,
            max_files: None,
        };
        let summary = FileListBuncher::default().bunch(&request).expect("bunch");

        assert_eq!(summary.directories.len(), 1);
        let bunched = &summary.directories[0];
        assert_eq!(bunched.lists, 3);
        assert_eq!(bunched.good, 23);
        assert_eq!(bunched.bad, 2);
        assert_eq!(bunched.bunch_dir, dir.join("bunches_3"));

        let last = fs::read_to_string(dir.join("bunches_3/filelist_3.txt")).expect("read list");
        assert_eq!(last.lines().count(), 3);
        let first = fs::read_to_string(dir.join("bunches_3/filelist_1.txt")).expect("read list");
        assert_eq!(first.lines().count(), 10);
    }

    #[test]
    fn test_bunch_respects_max_files_and_keywords() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        write_outputs(&temp_dir.path().join("1-20_uncut"), 20, 0);
        write_outputs(&temp_dir.path().join("1-20_xy_m_cut_real"), 20, 0);

        let request = BunchRequest {
            root: temp_dir.path(),
            dir_keywords: &["xy_m_cut"],
            files_per_bunch: 10,
            max_files: Some(15),
        };
        let summary = FileListBuncher::default().bunch(&request).expect("bunch");

        assert_eq!(summary.directories.len(), 1);
        assert_eq!(summary.directories[0].good, 15);
        assert!(temp_dir
            .path()
            .join("1-20_xy_m_cut_real/bunches_2/filelist_2.txt")
            .exists());
        assert!(!temp_dir.path().join("1-20_uncut/bunches_2").exists());
    }

    #[test]
    fn test_bunch_rejects_zero_batch_size() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let request = BunchRequest {
            root: temp_dir.path(),
            dir_keywords: &[],
            files_per_bunch: 0,
            max_files: None,
        };
        assert!(FileListBuncher::default().bunch(&request).is_err());
    }
}
