//! Test-only fixtures: a scratch git repository and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::report::{FailureReport, TestRunResult};
use crate::core::types::TestRef;
use crate::io::branch::BranchCoordinator;
use crate::io::generator::{GenerationRequest, Generator};
use crate::io::suite::TestSelector;
use crate::io::test_runner::TestRunner;

/// A temporary git repository with one initial commit on `main`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet", "--initial-branch=main"])?;
        repo.git(&["config", "user.name", "aitern-test"])?;
        repo.git(&["config", "user.email", "aitern-test@example.invalid"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write("README.md", "scratch\n")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "--quiet", "-m", "initial"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) -> Result<PathBuf> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Stage and commit everything.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "-m", message])
    }

    pub fn git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// Result of a run where `passed` tests all passed.
pub fn passing_run(passed: u32) -> TestRunResult {
    TestRunResult {
        exit_code: Some(0),
        total: passed,
        passed,
        ..TestRunResult::default()
    }
}

/// Result of a run where one test failed with `diagnostic`.
pub fn failing_run(node_id: &str, diagnostic: &str) -> TestRunResult {
    let message = diagnostic.lines().last().unwrap_or(diagnostic).trim().to_string();
    TestRunResult {
        exit_code: Some(1),
        total: 1,
        failed: 1,
        failures: vec![FailureReport {
            test: TestRef::from_node_id(node_id),
            message,
            diagnostic: diagnostic.to_string(),
            is_error: false,
        }],
        ..TestRunResult::default()
    }
}

/// Result of a run where collecting `file` failed.
pub fn collection_error_run(file: &str, diagnostic: &str) -> TestRunResult {
    let message = diagnostic.lines().last().unwrap_or(diagnostic).trim().to_string();
    TestRunResult {
        exit_code: Some(2),
        errors: 1,
        failures: vec![FailureReport {
            test: TestRef::from_node_id(file),
            message,
            diagnostic: diagnostic.to_string(),
            is_error: true,
        }],
        ..TestRunResult::default()
    }
}

/// Runner that replays scripted results, then repeats `fallback` if set.
pub struct ScriptedRunner {
    script: RefCell<VecDeque<Result<TestRunResult>>>,
    fallback: Option<TestRunResult>,
    selectors: RefCell<Vec<TestSelector>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<Result<TestRunResult>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            fallback: None,
            selectors: RefCell::new(Vec::new()),
        }
    }

    /// Return `result` on every call.
    pub fn repeating(result: TestRunResult) -> Self {
        Self {
            fallback: Some(result),
            ..Self::new(Vec::new())
        }
    }

    /// Selectors seen so far, in call order.
    pub fn selectors(&self) -> Vec<TestSelector> {
        self.selectors.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.selectors.borrow().len()
    }
}

impl TestRunner for ScriptedRunner {
    fn run(&self, selector: &TestSelector) -> Result<TestRunResult> {
        self.selectors.borrow_mut().push(selector.clone());
        if let Some(next) = self.script.borrow_mut().pop_front() {
            return next;
        }
        self.fallback
            .clone()
            .ok_or_else(|| anyhow!("scripted runner exhausted"))
    }
}

/// Generator that replays scripted completions and records requests.
pub struct ScriptedGenerator {
    script: RefCell<VecDeque<Result<String>>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted generator exhausted")))
    }
}

/// In-memory branch coordinator for engine tests.
#[derive(Default)]
pub struct FakeBranchCoordinator {
    pub current: RefCell<String>,
    pub branches: RefCell<Vec<String>>,
    pub commits: RefCell<Vec<String>>,
    pub merges: RefCell<Vec<(String, String)>>,
    pub pushes: RefCell<Vec<(String, String)>>,
    pub dirty: RefCell<Vec<String>>,
    pub fail_branch_creation: bool,
}

impl FakeBranchCoordinator {
    pub fn on_branch(name: &str) -> Self {
        Self {
            current: RefCell::new(name.to_string()),
            branches: RefCell::new(vec![name.to_string()]),
            ..Self::default()
        }
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }
}

impl BranchCoordinator for FakeBranchCoordinator {
    fn create_isolated_branch(&self, name: &str) -> bool {
        if self.fail_branch_creation || self.branches.borrow().iter().any(|b| b == name) {
            return false;
        }
        self.branches.borrow_mut().push(name.to_string());
        *self.current.borrow_mut() = name.to_string();
        true
    }

    fn checkout(&self, branch: &str) -> bool {
        if !self.branches.borrow().iter().any(|b| b == branch) {
            return false;
        }
        *self.current.borrow_mut() = branch.to_string();
        true
    }

    fn commit_all(&self, message: &str) -> Option<String> {
        let mut commits = self.commits.borrow_mut();
        commits.push(message.to_string());
        Some(format!("{:040x}", commits.len()))
    }

    fn merge_into(&self, source: &str, target: &str) -> bool {
        let branches = self.branches.borrow();
        if !branches.iter().any(|b| b == source) || !branches.iter().any(|b| b == target) {
            return false;
        }
        self.merges
            .borrow_mut()
            .push((source.to_string(), target.to_string()));
        *self.current.borrow_mut() = target.to_string();
        true
    }

    fn push(&self, remote: &str, branch: &str) -> bool {
        self.pushes
            .borrow_mut()
            .push((remote.to_string(), branch.to_string()));
        true
    }

    fn current_branch(&self) -> Option<String> {
        let current = self.current.borrow();
        (!current.is_empty()).then(|| current.clone())
    }

    fn dirty_paths(&self, allowed_prefixes: &[&str]) -> Option<Vec<String>> {
        Some(
            self.dirty
                .borrow()
                .iter()
                .filter(|path| !allowed_prefixes.iter().any(|p| path.starts_with(p)))
                .cloned()
                .collect(),
        )
    }
}
