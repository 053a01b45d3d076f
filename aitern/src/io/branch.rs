//! Branch isolation for exploration sessions.
//!
//! The coordinator is fail-closed: every git error is logged and mapped to
//! `false`/`None` so callers decide what a failure means for them.

use tracing::{info, warn};

use crate::io::git::Git;

pub trait BranchCoordinator {
    /// Create and check out `name` at HEAD. Fails when `name` already exists.
    fn create_isolated_branch(&self, name: &str) -> bool;
    /// Check out an existing branch.
    fn checkout(&self, branch: &str) -> bool;
    /// Stage everything and commit; returns the commit id.
    fn commit_all(&self, message: &str) -> Option<String>;
    /// Merge `source` into `target`, leaving `target` checked out. A failed
    /// merge is aborted.
    fn merge_into(&self, source: &str, target: &str) -> bool;
    fn push(&self, remote: &str, branch: &str) -> bool;
    fn current_branch(&self) -> Option<String>;
    /// Uncommitted paths outside `allowed_prefixes`; `None` when status is unreadable.
    fn dirty_paths(&self, allowed_prefixes: &[&str]) -> Option<Vec<String>>;
}

impl<B: BranchCoordinator + ?Sized> BranchCoordinator for &B {
    fn create_isolated_branch(&self, name: &str) -> bool {
        (**self).create_isolated_branch(name)
    }

    fn checkout(&self, branch: &str) -> bool {
        (**self).checkout(branch)
    }

    fn commit_all(&self, message: &str) -> Option<String> {
        (**self).commit_all(message)
    }

    fn merge_into(&self, source: &str, target: &str) -> bool {
        (**self).merge_into(source, target)
    }

    fn push(&self, remote: &str, branch: &str) -> bool {
        (**self).push(remote, branch)
    }

    fn current_branch(&self) -> Option<String> {
        (**self).current_branch()
    }

    fn dirty_paths(&self, allowed_prefixes: &[&str]) -> Option<Vec<String>> {
        (**self).dirty_paths(allowed_prefixes)
    }
}

/// Coordinator backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitBranchCoordinator {
    git: Git,
}

impl GitBranchCoordinator {
    pub fn new(git: Git) -> Self {
        Self { git }
    }
}

impl BranchCoordinator for GitBranchCoordinator {
    fn create_isolated_branch(&self, name: &str) -> bool {
        match self.git.branch_exists(name) {
            Ok(true) => {
                warn!(branch = name, "branch already exists");
                return false;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(branch = name, err = %err, "could not check branch");
                return false;
            }
        }
        match self.git.checkout_new_branch(name) {
            Ok(()) => {
                info!(branch = name, "created exploration branch");
                true
            }
            Err(err) => {
                warn!(branch = name, err = %err, "branch creation failed");
                false
            }
        }
    }

    fn checkout(&self, branch: &str) -> bool {
        match self.git.checkout(branch) {
            Ok(()) => true,
            Err(err) => {
                warn!(branch, err = %err, "checkout failed");
                false
            }
        }
    }

    fn commit_all(&self, message: &str) -> Option<String> {
        let committed = self
            .git
            .add_all()
            .and_then(|()| self.git.commit_allow_empty(message));
        match committed {
            Ok(sha) => Some(sha),
            Err(err) => {
                warn!(err = %err, "commit failed");
                None
            }
        }
    }

    fn merge_into(&self, source: &str, target: &str) -> bool {
        if let Err(err) = self.git.checkout(target) {
            warn!(target, err = %err, "checkout of merge target failed");
            return false;
        }
        let message = format!("Merge exploration branch {source}");
        match self.git.merge_no_ff(source, &message) {
            Ok(()) => {
                info!(source, target, "merged exploration branch");
                true
            }
            Err(err) => {
                warn!(source, target, err = %err, "merge failed");
                false
            }
        }
    }

    fn push(&self, remote: &str, branch: &str) -> bool {
        match self.git.push(remote, branch) {
            Ok(()) => true,
            Err(err) => {
                warn!(remote, branch, err = %err, "push failed");
                false
            }
        }
    }

    fn current_branch(&self) -> Option<String> {
        match self.git.current_branch() {
            Ok(name) => Some(name),
            Err(err) => {
                warn!(err = %err, "could not read current branch");
                None
            }
        }
    }

    fn dirty_paths(&self, allowed_prefixes: &[&str]) -> Option<Vec<String>> {
        match self.git.dirty_paths_except(allowed_prefixes) {
            Ok(paths) => Some(paths),
            Err(err) => {
                warn!(err = %err, "could not read worktree status");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn duplicate_branch_creation_fails() {
        let repo = TestRepo::new().expect("repo");
        let branches = GitBranchCoordinator::new(Git::new(repo.root()));

        assert!(branches.create_isolated_branch("aitern/exploration-1"));
        assert_eq!(
            branches.current_branch().as_deref(),
            Some("aitern/exploration-1")
        );
        assert!(!branches.create_isolated_branch("aitern/exploration-1"));
    }

    #[test]
    fn checkout_returns_to_an_existing_branch() {
        let repo = TestRepo::new().expect("repo");
        let branches = GitBranchCoordinator::new(Git::new(repo.root()));
        let base = branches.current_branch().expect("base");

        assert!(branches.create_isolated_branch("aitern/exploration-2"));
        assert!(branches.checkout(&base));
        assert_eq!(branches.current_branch(), Some(base));
        assert!(!branches.checkout("no-such-branch"));
    }

    #[test]
    fn commit_all_returns_new_head_even_when_empty() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        let branches = GitBranchCoordinator::new(git.clone());

        let before = git.head_sha().expect("head");
        let first = branches.commit_all("empty iteration").expect("commit");
        assert_ne!(first, before);

        repo.write("calc.py", "def add(a, b):\n    return a + b\n")
            .expect("write");
        let second = branches.commit_all("add calc").expect("commit");
        assert_ne!(second, first);
        assert!(git.dirty_paths_except(&[]).expect("status").is_empty());
    }

    #[test]
    fn merge_into_brings_changes_to_target() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        let branches = GitBranchCoordinator::new(git.clone());
        let base = branches.current_branch().expect("base");

        assert!(branches.create_isolated_branch("aitern/merge-me"));
        repo.write("calc.py", "x = 1\n").expect("write");
        branches.commit_all("add calc").expect("commit");

        assert!(branches.merge_into("aitern/merge-me", &base));
        assert_eq!(branches.current_branch(), Some(base));
        assert!(repo.root().join("calc.py").is_file());
    }

    #[test]
    fn merge_into_missing_branch_fails_closed() {
        let repo = TestRepo::new().expect("repo");
        let branches = GitBranchCoordinator::new(Git::new(repo.root()));
        let base = branches.current_branch().expect("base");
        assert!(!branches.merge_into("no-such-branch", &base));
        assert!(!branches.merge_into("no-such-branch", "no-such-target"));
    }

    #[test]
    fn dirty_paths_respects_allowed_prefixes() {
        let repo = TestRepo::new().expect("repo");
        let branches = GitBranchCoordinator::new(Git::new(repo.root()));
        repo.write(".aitern/explorations/s.json", "{}").expect("write");
        assert_eq!(branches.dirty_paths(&[".aitern/"]), Some(Vec::new()));

        repo.write("calc.py", "x = 1\n").expect("write");
        assert_eq!(
            branches.dirty_paths(&[".aitern/"]),
            Some(vec!["calc.py".to_string()])
        );
    }

    #[test]
    fn push_without_remote_fails_closed() {
        let repo = TestRepo::new().expect("repo");
        let branches = GitBranchCoordinator::new(Git::new(repo.root()));
        let base = branches.current_branch().expect("base");
        assert!(!branches.push("origin", &base));
    }
}
