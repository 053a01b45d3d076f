//! Test discovery and selection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::path::to_slash;
use crate::core::types::TestCase;

/// What to hand the test runner: files plus an optional name filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSelector {
    /// Test files relative to the project root. Empty means "the whole suite".
    pub paths: Vec<PathBuf>,
    /// Runner-level name filter (`-k` for pytest).
    pub name_filter: Option<String>,
}

impl TestSelector {
    pub fn for_cases(cases: &[TestCase]) -> Self {
        Self {
            paths: cases.iter().map(|case| case.path.clone()).collect(),
            name_filter: None,
        }
    }

    /// Select a single test function inside one file.
    pub fn single(file: &Path, name: &str) -> Self {
        Self {
            paths: vec![file.to_path_buf()],
            name_filter: Some(name.to_string()),
        }
    }
}

/// Test files discovered under the test directory.
#[derive(Debug, Clone, Default)]
pub struct TestSuiteIndex {
    cases: Vec<TestCase>,
}

impl TestSuiteIndex {
    /// Discover `test_*.py` and `*_test.py` under `root/test_dir`, sorted by path.
    pub fn discover(root: &Path, test_dir: &Path) -> Result<Self> {
        let base = root.join(test_dir);
        let mut cases = Vec::new();
        if !base.is_dir() {
            debug!(dir = %base.display(), "test directory missing");
            return Ok(Self { cases });
        }
        let walker = WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry.file_name()));
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {}", base.display()))?;
            if !entry.file_type().is_file() || !is_test_file(entry.path()) {
                continue;
            }
            let path = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("relativize {}", entry.path().display()))?
                .to_path_buf();
            let within_test_dir = entry
                .path()
                .strip_prefix(&base)
                .with_context(|| format!("relativize {}", entry.path().display()))?;
            let module = to_slash(&within_test_dir.with_extension("")).replace('/', ".");
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            cases.push(TestCase { name, path, module });
        }
        debug!(count = cases.len(), "discovered tests");
        Ok(Self { cases })
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Cases matching any filter by name, module or path. No filters selects all.
    pub fn select(&self, filters: &[String]) -> Vec<TestCase> {
        if filters.is_empty() {
            return self.cases.clone();
        }
        self.cases
            .iter()
            .filter(|case| filters.iter().any(|filter| matches_filter(case, filter)))
            .cloned()
            .collect()
    }
}

fn matches_filter(case: &TestCase, filter: &str) -> bool {
    let filter = filter.trim();
    let bare = filter.strip_suffix(".py").unwrap_or(filter);
    case.name == bare || case.module == bare || to_slash(&case.path) == filter
}

fn is_test_file(path: &Path) -> bool {
    if path.extension().and_then(|ext| ext.to_str()) != Some("py") {
        return false;
    }
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    stem.starts_with("test_") || stem.ends_with("_test")
}

fn is_skipped_dir(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name == "__pycache__" || name == "node_modules"
}
