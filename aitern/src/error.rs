//! Typed errors for conditions callers branch on.
//!
//! Everything else travels as `anyhow::Error` with context; these types are
//! recovered with `downcast_ref` where the CLI or engine needs to tell them
//! apart.

use std::path::PathBuf;

use thiserror::Error;

/// Session setup and lifecycle failures. All are fatal for the command.
#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("no tests matched the selection in {test_dir}")]
    NoTestsFound { test_dir: PathBuf },
    #[error("failed to create exploration branch {branch}")]
    BranchCreation { branch: String },
    #[error("an exploration session is already active: {session_id}")]
    SessionActive { session_id: String },
    #[error("no exploration session is active")]
    NoActiveSession,
    #[error("working tree has uncommitted changes: {}", paths.join(", "))]
    DirtyWorktree { paths: Vec<String> },
}

/// Rejections of a modification plan before any edit runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("edit path {path} resolves outside the project root")]
    PathEscape { path: PathBuf },
}

/// The generative planner ran out of attempts without an accepted candidate.
#[derive(Debug, Error)]
#[error("generation exhausted after {attempts} attempts for {target}: {last_reason}")]
pub struct GenerationExhausted {
    pub target: PathBuf,
    pub attempts: u32,
    pub last_reason: String,
}
