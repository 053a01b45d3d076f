//! `.aitern/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::atomic::write_atomic;
use crate::io::config::{AiternConfig, write_config};

/// Ignore rules for `.aitern/`: session records and stray temp files.
pub const AITERN_GITIGNORE: &str = "explorations/\n.*.aitern-tmp\n";

/// Ignore file placed in the record directory so records stay untracked
/// wherever that directory lives.
pub const RECORD_DIR_GITIGNORE: &str = "*\n";

/// Canonical paths within `.aitern/` for a project root.
#[derive(Debug, Clone)]
pub struct AiternPaths {
    pub root: PathBuf,
    pub aitern_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl AiternPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let aitern_dir = root.join(".aitern");
        Self {
            gitignore_path: aitern_dir.join(".gitignore"),
            config_path: aitern_dir.join("config.toml"),
            aitern_dir,
            root,
        }
    }

    /// Record directory for `cfg`, resolved against the project root.
    pub fn record_dir(&self, cfg: &AiternConfig) -> PathBuf {
        self.root.join(&cfg.record_dir)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Overwrite an existing config.
    pub force: bool,
}

/// Write the default config and `.aitern/.gitignore` under `root`.
pub fn init_project(root: &Path, options: InitOptions) -> Result<AiternPaths> {
    let paths = AiternPaths::new(root);
    if paths.aitern_dir.exists() && !paths.aitern_dir.is_dir() {
        return Err(anyhow!("aitern init: .aitern exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "aitern init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }
    fs::create_dir_all(&paths.aitern_dir)
        .with_context(|| format!("create directory {}", paths.aitern_dir.display()))?;
    write_config(&paths.config_path, &AiternConfig::default())?;
    write_atomic(&paths.gitignore_path, AITERN_GITIGNORE.as_bytes())?;
    info!(root = %root.display(), "initialized .aitern");
    Ok(paths)
}

/// Make sure `.aitern/.gitignore` exists and ignores session records.
///
/// Returns true when the file was written.
pub fn ensure_gitignore(paths: &AiternPaths) -> Result<bool> {
    if paths.gitignore_path.is_file() {
        let contents = fs::read_to_string(&paths.gitignore_path)
            .with_context(|| format!("read {}", paths.gitignore_path.display()))?;
        if contents.lines().any(|line| line.trim() == "explorations/") {
            return Ok(false);
        }
        let mut updated = contents;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(AITERN_GITIGNORE);
        write_atomic(&paths.gitignore_path, updated.as_bytes())?;
        return Ok(true);
    }
    write_atomic(&paths.gitignore_path, AITERN_GITIGNORE.as_bytes())?;
    Ok(true)
}

/// Make sure `record_dir` carries a `.gitignore` that ignores everything in it.
pub fn ensure_record_dir_ignored(record_dir: &Path) -> Result<()> {
    let path = record_dir.join(".gitignore");
    if path.is_file() {
        return Ok(());
    }
    write_atomic(&path, RECORD_DIR_GITIGNORE.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_writes_config_and_gitignore() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), InitOptions::default()).expect("init");
        assert_eq!(
            load_config(&paths.config_path).expect("load"),
            AiternConfig::default()
        );
        let ignore = fs::read_to_string(&paths.gitignore_path).expect("read");
        assert!(ignore.lines().any(|line| line == "explorations/"));
    }

    #[test]
    fn init_refuses_existing_config_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_project(temp.path(), InitOptions::default()).expect("init");
        let err = init_project(temp.path(), InitOptions::default()).expect_err("second init");
        assert!(err.to_string().contains("--force"));
        init_project(temp.path(), InitOptions { force: true }).expect("forced init");
    }

    #[test]
    fn ensure_gitignore_appends_missing_rule_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = AiternPaths::new(temp.path());
        fs::create_dir_all(&paths.aitern_dir).expect("mkdir");
        fs::write(&paths.gitignore_path, "scratch/").expect("write");

        assert!(ensure_gitignore(&paths).expect("ensure"));
        assert!(!ensure_gitignore(&paths).expect("ensure again"));
        let ignore = fs::read_to_string(&paths.gitignore_path).expect("read");
        assert!(ignore.starts_with("scratch/\nexplorations/\n"));
    }

    #[test]
    fn record_dir_ignore_is_written_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("records");
        ensure_record_dir_ignored(&dir).expect("ensure");
        fs::write(dir.join(".gitignore"), "*\n!keep.json\n").expect("write");
        ensure_record_dir_ignored(&dir).expect("ensure again");
        assert_eq!(
            fs::read_to_string(dir.join(".gitignore")).expect("read"),
            "*\n!keep.json\n"
        );
    }
}
