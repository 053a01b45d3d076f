//! `aitern apply`: merge a successful session's branch into its base branch.

use anyhow::{Result, anyhow};
use thiserror::Error;
use tracing::info;

use crate::io::branch::BranchCoordinator;
use crate::io::recorder::{ExplorationRecorder, ExplorationSession};

/// The session exists but did not end with a passing suite.
#[derive(Debug, Error)]
#[error("session {session_id} did not succeed; refusing to merge {branch}")]
pub struct ApplyRefused {
    pub session_id: String,
    pub branch: String,
}

/// Merge the branch of session `id` into the branch it started from.
pub fn apply_session<B: BranchCoordinator>(
    recorder: &ExplorationRecorder,
    branches: &B,
    id: &str,
) -> Result<ExplorationSession> {
    let session = recorder.load(id)?;
    if !session.success {
        return Err(ApplyRefused {
            session_id: session.id,
            branch: session.branch,
        }
        .into());
    }
    if !branches.merge_into(&session.branch, &session.base_branch) {
        return Err(anyhow!(
            "merge of {} into {} failed",
            session.branch,
            session.base_branch
        ));
    }
    info!(session_id = %session.id, branch = %session.branch, base = %session.base_branch, "session applied");
    Ok(session)
}
