//! Source file lookup and structural summaries.
//!
//! Search runs three strategies in order and de-duplicates by path, keeping
//! the first hit: naming inference from test names, plain substring search,
//! then an optional semantic search when too little was found.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::path::to_slash;
use crate::core::summary::{StructuralSummary, summarize_source};
use crate::core::types::SearchResult;
use crate::io::config::SearchConfig;

pub const INFERENCE_RELEVANCE: f64 = 0.9;
pub const TEXT_MATCH_RELEVANCE: f64 = 0.7;

/// Directory names never searched.
const SKIPPED_DIRS: [&str; 6] = [
    "__pycache__",
    "node_modules",
    "venv",
    "env",
    "build",
    "dist",
];

/// Pluggable fallback search, consulted when the cheap strategies come up short.
pub trait SemanticSearch {
    fn search(&self, query: &str, files: &[PathBuf]) -> Result<Vec<SearchResult>>;
}

pub struct CodeIndex {
    root: PathBuf,
    config: SearchConfig,
    files: Vec<PathBuf>,
    semantic: Option<Rc<dyn SemanticSearch>>,
}

impl CodeIndex {
    /// Scan `root` for source files with the configured extensions.
    pub fn scan(root: impl Into<PathBuf>, config: SearchConfig) -> Result<Self> {
        let mut index = Self {
            root: root.into(),
            config,
            files: Vec::new(),
            semantic: None,
        };
        index.refresh()?;
        Ok(index)
    }

    pub fn with_semantic(mut self, semantic: Rc<dyn SemanticSearch>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    /// Re-scan the tree; edits between iterations add and remove files.
    pub fn refresh(&mut self) -> Result<()> {
        self.files = list_source_files(&self.root, &self.config.extensions)?;
        debug!(count = self.files.len(), "indexed source files");
        Ok(())
    }

    /// Indexed files, relative to the root, sorted.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file_set(&self) -> BTreeSet<PathBuf> {
        self.files.iter().cloned().collect()
    }

    /// Results for `query`, highest relevance first.
    #[instrument(skip_all, fields(query = query))]
    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = Vec::new();

        if let Some(module) = query.strip_prefix("test_").filter(|m| !m.is_empty()) {
            for path in self.inferred_files(module) {
                let reason = format!("module '{module}' inferred from test name '{query}'");
                push_unique(&mut results, self.result(path, INFERENCE_RELEVANCE, reason));
            }
        }

        if !query.is_empty() {
            for path in &self.files {
                let content = match fs::read_to_string(self.root.join(path)) {
                    Ok(content) => content,
                    Err(err) => {
                        debug!(path = %path.display(), err = %err, "skipping unreadable file");
                        continue;
                    }
                };
                if content.contains(query) {
                    let reason = format!("text matches '{query}'");
                    push_unique(
                        &mut results,
                        SearchResult {
                            path: path.clone(),
                            relevance: TEXT_MATCH_RELEVANCE,
                            reason,
                            preview: preview(&content, self.config.preview_chars),
                        },
                    );
                }
            }
        }

        if results.len() < self.config.min_results
            && let Some(semantic) = &self.semantic
        {
            match semantic.search(query, &self.files) {
                Ok(found) => {
                    for result in found {
                        push_unique(&mut results, result);
                    }
                }
                Err(err) => warn!(err = %err, "semantic search failed"),
            }
        }

        results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        debug!(count = results.len(), "search finished");
        results
    }

    /// Structural summary of `path` (relative to the root).
    pub fn summarize(&self, path: &Path) -> Result<StructuralSummary> {
        let full = self.root.join(path);
        let content =
            fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))?;
        Ok(summarize_source(path, &content))
    }

    /// Files named after a module inferred from a test: `X.py` or
    /// `X/__init__.py` for `X` as-is, with `_` as `/`, and with `_` as `.`.
    fn inferred_files(&self, module: &str) -> Vec<PathBuf> {
        let variants = [
            module.to_string(),
            module.replace('_', "/"),
            module.replace('_', "."),
        ];
        let mut found = Vec::new();
        for variant in &variants {
            let as_file = format!("{variant}.py");
            let as_package = format!("{variant}/__init__.py");
            for path in &self.files {
                let slash = to_slash(path);
                let matches = ends_with_component(&slash, &as_file)
                    || ends_with_component(&slash, &as_package);
                if matches && !found.contains(path)
                {
                    found.push(path.clone());
                }
            }
        }
        found
    }

    fn result(&self, path: PathBuf, relevance: f64, reason: String) -> SearchResult {
        let content = fs::read_to_string(self.root.join(&path)).unwrap_or_default();
        SearchResult {
            preview: preview(&content, self.config.preview_chars),
            path,
            relevance,
            reason,
        }
    }
}

fn push_unique(results: &mut Vec<SearchResult>, result: SearchResult) {
    if !results.iter().any(|existing| existing.path == result.path) {
        results.push(result);
    }
}

/// True when `path` is `suffix` or ends with `/suffix`.
fn ends_with_component(path: &str, suffix: &str) -> bool {
    path == suffix
        || path
            .strip_suffix(suffix)
            .is_some_and(|head| head.ends_with('/'))
}

/// First `chars` characters of `content`.
pub fn preview(content: &str, chars: usize) -> String {
    content.chars().take(chars).collect()
}

/// Source files under `root` with one of `extensions`, relative and sorted.
pub fn list_source_files(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches_ext = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want == ext));
        if !matches_ext {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        files.push(rel.to_path_buf());
    }
    Ok(files)
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref())
}
