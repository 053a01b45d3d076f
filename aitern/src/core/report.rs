//! Parsing of pytest terminal reports into structured run results.
//!
//! The runner is invoked with `-v -rfE --tb=short`, which yields per-test
//! failure sections (`____ test_add ____`), a short summary
//! (`FAILED tests/test_calc.py::test_add - assert 4 == 5`) and a final count
//! line (`==== 1 failed, 2 passed in 0.12s ====`).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::TestRef;

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) (passed|failed|skipped|errors?|xfailed|xpassed)").expect("static regex")
});
static SUMMARY_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(FAILED|ERROR) (\S+)(?: - (.*))?$").expect("static regex")
});
static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_{3,} (.+?) _{3,}$").expect("static regex"));

/// Failure of one test (or one test file, for collection errors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub test: TestRef,
    /// One-line message from the short summary.
    pub message: String,
    /// Full failure section, falling back to the message.
    pub diagnostic: String,
    /// True for `ERROR` entries (collection/setup errors).
    pub is_error: bool,
}

/// Structured result of one test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub exit_code: Option<i32>,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub errors: u32,
    pub failures: Vec<FailureReport>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub output: String,
}

impl TestRunResult {
    /// True only when the run exited cleanly with no failures or errors.
    pub fn all_passed(&self) -> bool {
        self.exit_code == Some(0) && self.failed == 0 && self.errors == 0
    }

    /// Whether pytest produced a report we can act on.
    ///
    /// Exit 0 (all passed) is always recognized. Exit 1 (tests failed) needs
    /// the final count line, without which the failures cannot be trusted.
    /// Exit 2 (interrupted) is recognized when it carries collection errors.
    /// Anything else (internal error, usage error, no tests collected, signals)
    /// is not.
    pub fn is_recognized(&self) -> bool {
        match self.exit_code {
            Some(0) => true,
            Some(1) => self.total > 0,
            Some(2) => !self.failures.is_empty() || self.errors > 0,
            _ => false,
        }
    }
}

/// Parse pytest output. Never fails; unparsed parts are left at defaults.
pub fn parse_pytest_report(output: &str, exit_code: Option<i32>) -> TestRunResult {
    let mut result = TestRunResult {
        exit_code,
        output: output.to_string(),
        ..TestRunResult::default()
    };

    if let Some(line) = output.lines().rev().find(|line| is_count_line(line)) {
        for caps in COUNT.captures_iter(line) {
            let n: u32 = caps[1].parse().unwrap_or(0);
            match &caps[2] {
                "passed" | "xpassed" => result.passed += n,
                "failed" => result.failed += n,
                "skipped" | "xfailed" => result.skipped += n,
                _ => result.errors += n,
            }
        }
    }
    result.total = result.passed + result.failed + result.skipped + result.errors;

    let sections = failure_sections(output);
    for line in output.lines() {
        let Some(caps) = SUMMARY_ENTRY.captures(line.trim_end()) else {
            continue;
        };
        let is_error = &caps[1] == "ERROR";
        let test = TestRef::from_node_id(&caps[2]);
        let message = caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let key = section_key(&test, is_error);
        let mut diagnostic = sections.get(&key).cloned().unwrap_or_default();
        if !message.is_empty() && !diagnostic.contains(&message) {
            if !diagnostic.is_empty() {
                diagnostic.push('\n');
            }
            diagnostic.push_str(&message);
        }
        result.failures.push(FailureReport {
            test,
            message,
            diagnostic,
            is_error,
        });
    }
    result
}

fn is_count_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('=')
        && trimmed.ends_with('=')
        && trimmed.contains(" in ")
        && COUNT.is_match(trimmed)
}

/// Key a failure section the way pytest titles it.
fn section_key(test: &TestRef, is_error: bool) -> String {
    if is_error && !test.node_id.contains("::") {
        return format!("ERROR collecting {}", test.node_id);
    }
    match test.node_id.split_once("::") {
        Some((_, rest)) => {
            let title = rest.replace("::", ".");
            if is_error {
                format!("ERROR at setup of {title}")
            } else {
                title
            }
        }
        None => test.node_id.clone(),
    }
}

/// Collect `____ title ____` sections until the next header or `====` banner.
fn failure_sections(output: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in output.lines() {
        if let Some(caps) = SECTION_HEADER.captures(line.trim_end()) {
            if let Some((title, body)) = current.take() {
                sections.insert(title, body.join("\n").trim().to_string());
            }
            current = Some((caps[1].to_string(), Vec::new()));
            continue;
        }
        if line.starts_with("====") {
            if let Some((title, body)) = current.take() {
                sections.insert(title, body.join("\n").trim().to_string());
            }
            continue;
        }
        if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((title, body)) = current.take() {
        sections.insert(title, body.join("\n").trim().to_string());
    }
    sections
}
