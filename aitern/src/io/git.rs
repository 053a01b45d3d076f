//! Thin wrapper around `git` subprocess calls.
//!
//! Every call is explicit about its working directory; nothing here reads
//! global state beyond what git itself reads.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Two-letter XY code, or `??` for untracked.
    pub code: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Current branch name; errors on detached HEAD.
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let name = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = name.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD has no branch name"));
        }
        Ok(name)
    }

    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn status(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// Paths with changes outside the allowed prefixes.
    pub fn dirty_paths_except(&self, allowed_prefixes: &[&str]) -> Result<Vec<String>> {
        let dirty: Vec<String> = self
            .status()?
            .into_iter()
            .filter(|entry| {
                !allowed_prefixes
                    .iter()
                    .any(|prefix| entry.path.starts_with(prefix))
            })
            .map(|entry| entry.path)
            .collect();
        if !dirty.is_empty() {
            warn!(dirty_count = dirty.len(), "worktree not clean");
        }
        Ok(dirty)
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        let output = self.run(&["show-ref", "--verify", "--quiet", &reference])?;
        Ok(output.status.success())
    }

    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage everything, honoring `.gitignore`.
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit whatever is staged (possibly nothing) and return the new HEAD.
    #[instrument(skip_all)]
    pub fn commit_allow_empty(&self, message: &str) -> Result<String> {
        self.run_checked(&["commit", "--allow-empty", "--no-verify", "-m", message])?;
        self.head_sha()
    }

    /// Merge `source` into the checked-out branch; aborts on conflict.
    #[instrument(skip_all, fields(source))]
    pub fn merge_no_ff(&self, source: &str, message: &str) -> Result<()> {
        let merged = self.run_checked(&["merge", "--no-ff", "-m", message, source]);
        if let Err(err) = merged {
            warn!(source, err = %err, "merge failed, aborting");
            if let Err(abort_err) = self.run_checked(&["merge", "--abort"]) {
                warn!(err = %abort_err, "merge --abort failed");
            }
            return Err(err);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", "--set-upstream", remote, branch])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: unquote(path.trim()),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let rest = line[3..].trim();
    let path = rest.split_once(" -> ").map_or(rest, |(_, new)| new.trim());
    Ok(StatusEntry {
        code,
        path: unquote(path),
    })
}

/// Git quotes paths containing spaces or special characters.
fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}
