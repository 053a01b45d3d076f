//! Out-of-process test execution.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::path::to_slash;
use crate::core::report::{TestRunResult, parse_pytest_report};
use crate::io::config::TestConfig;
use crate::io::process::run_bounded;
use crate::io::suite::TestSelector;

/// Runs a selection of tests and reports structured results.
///
/// `Err` means the run itself failed (spawn failure, timeout, unrecognized
/// exit); failing tests are a normal `Ok` result.
pub trait TestRunner {
    fn run(&self, selector: &TestSelector) -> Result<TestRunResult>;
}

impl<R: TestRunner + ?Sized> TestRunner for &R {
    fn run(&self, selector: &TestSelector) -> Result<TestRunResult> {
        (**self).run(selector)
    }
}

/// Flags that make pytest output parseable and side-effect free.
const PYTEST_FLAGS: [&str; 6] = [
    "-v",
    "-rfE",
    "--tb=short",
    "-p",
    "no:cacheprovider",
    "--color=no",
];

#[derive(Debug, Clone)]
pub struct PytestRunner {
    root: PathBuf,
    config: TestConfig,
}

impl PytestRunner {
    pub fn new(root: impl Into<PathBuf>, config: TestConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn command(&self, selector: &TestSelector) -> Result<Command> {
        let (program, prefix) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("test.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .args(PYTEST_FLAGS)
            .args(selector.paths.iter().map(|path| to_slash(path)))
            .current_dir(&self.root)
            .env("PYTHONDONTWRITEBYTECODE", "1");
        if let Some(filter) = &selector.name_filter {
            cmd.arg("-k").arg(filter);
        }
        Ok(cmd)
    }
}

impl TestRunner for PytestRunner {
    #[instrument(skip_all, fields(files = selector.paths.len(), filter = ?selector.name_filter))]
    fn run(&self, selector: &TestSelector) -> Result<TestRunResult> {
        let cmd = self.command(selector)?;
        let output = run_bounded(
            cmd,
            None,
            Duration::from_secs(self.config.timeout_secs),
            self.config.output_limit_bytes,
        )?;
        if output.timed_out {
            return Err(anyhow!(
                "test run timed out after {}s",
                self.config.timeout_secs
            ));
        }
        let result = parse_pytest_report(&output.combined_text(), output.exit_code());
        if !result.is_recognized() {
            warn!(exit_code = ?result.exit_code, "unrecognized test run outcome");
            return Err(anyhow!(
                "test run ended with unrecognized exit code {:?}: {}",
                result.exit_code,
                tail(&result.output, 20)
            ));
        }
        info!(
            passed = result.passed,
            failed = result.failed,
            errors = result.errors,
            "test run finished"
        );
        Ok(result)
    }
}

/// Last `lines` lines of `text`, for error messages.
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
