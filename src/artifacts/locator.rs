//! Recursive directory search by path keywords and file-name patterns.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Finds directories whose path contains a set of keywords and which hold a
/// file whose name contains a set of patterns.
#[derive(Debug, Clone)]
pub struct DirectorySearcher {
    keywords: Vec<String>,
}

impl DirectorySearcher {
    /// Creates a searcher for the given path keywords.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    /// Searches `root` recursively.
    ///
    /// Returns the sorted list of directories whose full path contains every
    /// keyword and which directly contain a file whose name contains every
    /// entry of `filename_patterns`. Unreadable entries are skipped; a missing
    /// root yields an empty list.
    pub fn search(&self, root: &Path, filename_patterns: &[&str]) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();

        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if !filename_patterns.iter().all(|p| file_name.contains(p)) {
                continue;
            }
            let Some(parent) = entry.path().parent() else {
                continue;
            };
            if found.contains(parent) {
                continue;
            }
            let parent_str = parent.to_string_lossy();
            if self.keywords.iter().all(|k| parent_str.contains(k.as_str())) {
                found.insert(parent.to_path_buf());
            }
        }

        debug!(
            root = %root.display(),
            keywords = ?self.keywords,
            patterns = ?filename_patterns,
            matches = found.len(),
            "Directory search finished"
        );
        found.into_iter().collect()
    }

    /// Returns the first match of [`search`](Self::search), if any.
    pub fn find_first(&self, root: &Path, filename_patterns: &[&str]) -> Option<PathBuf> {
        self.search(root, filename_patterns).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        std::fs::write(path, b"x").expect("write file");
    }

    #[test]
    fn test_search_matches_keywords_and_pattern() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();
        touch(&root.join("plab_1.5GeV/dpm_elastic/1-10_uncut/Lumi_TrksQA_1.root"));
        touch(&root.join("plab_1.5GeV/dpm_elastic/1-10_xy_m_cut_real/Lumi_TrksQA_1.root"));
        touch(&root.join("plab_1.5GeV/box/1-10_uncut/Lumi_TrksQA_1.root"));

        let searcher = DirectorySearcher::new(["dpm_elastic", "uncut"]);
        let found = searcher.search(root, &["Lumi_TrksQA_"]);

        assert_eq!(found, vec![root.join("plab_1.5GeV/dpm_elastic/1-10_uncut")]);
    }

    #[test]
    fn test_search_requires_all_filename_patterns() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();
        touch(&root.join("merge_data/binning_300/lmd_vertex_data_1of1.root"));
        touch(&root.join("bunches_2/binning_300/merge_data/lmd_vertex_data_1of2.root"));

        let searcher = DirectorySearcher::new(["merge_data", "binning_300"]);
        let found = searcher.search(root, &["lmd_vertex_data_", "of1.root"]);

        assert_eq!(found, vec![root.join("merge_data/binning_300")]);
    }

    #[test]
    fn test_search_deduplicates_directories() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();
        for i in 0..5 {
            touch(&root.join(format!("1-5_uncut/Lumi_TrksQA_{}.root", i)));
        }

        let found = DirectorySearcher::new(["uncut"]).search(root, &["Lumi_TrksQA_"]);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_search_missing_root_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let searcher = DirectorySearcher::new(["uncut"]);
        assert!(searcher
            .find_first(&temp_dir.path().join("nope"), &["Lumi_TrksQA_"])
            .is_none());
    }
}
