//! Content-hash snapshots of project source files.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::path::to_slash;
use crate::io::code_index::list_source_files;

/// SHA-256 per source file, keyed by `/`-separated relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnapshot {
    pub taken_at: DateTime<Utc>,
    pub files: BTreeMap<String, String>,
}

impl CodeSnapshot {
    pub fn take(root: &Path, extensions: &[String]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for rel in list_source_files(root, extensions)? {
            let bytes =
                fs::read(root.join(&rel)).with_context(|| format!("read {}", rel.display()))?;
            files.insert(to_slash(&rel), content_hash(&bytes));
        }
        Ok(Self {
            taken_at: Utc::now(),
            files,
        })
    }

    /// Paths added, removed or changed relative to `earlier`.
    pub fn changed_since(&self, earlier: &CodeSnapshot) -> Vec<String> {
        let mut changed: Vec<String> = self
            .files
            .iter()
            .filter(|(path, hash)| earlier.files.get(*path) != Some(*hash))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            earlier
                .files
                .keys()
                .filter(|path| !self.files.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
