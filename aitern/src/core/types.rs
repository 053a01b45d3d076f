//! Shared types for the exploration loop.
//!
//! These types cross the boundary between pure core logic and I/O adapters and
//! are serialized verbatim into session records, so field names are part of the
//! persisted format.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A discovered test unit (one test file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// File stem, e.g. `test_calculator`.
    pub name: String,
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Dotted module path relative to the test directory.
    pub module: String,
}

/// Reference to a single failing test as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRef {
    /// Runner node id, e.g. `tests/test_calc.py::test_add`.
    pub node_id: String,
    /// Test file relative to the project root.
    pub file: PathBuf,
    /// Test function name, or the file stem for collection errors.
    pub name: String,
}

impl TestRef {
    /// Build a reference from a pytest-style node id.
    pub fn from_node_id(node_id: &str) -> Self {
        let (file, rest) = match node_id.split_once("::") {
            Some((file, rest)) => (file, Some(rest)),
            None => (node_id, None),
        };
        let name = match rest {
            Some(rest) => {
                let last = rest.rsplit("::").next().unwrap_or(rest);
                // Drop parametrization ids: `test_add[1-2]` -> `test_add`.
                last.split('[').next().unwrap_or(last).to_string()
            }
            None => Path::new(file)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| file.to_string()),
        };
        Self {
            node_id: node_id.to_string(),
            file: PathBuf::from(file),
            name,
        }
    }

    /// Stem of the test file (`tests/test_calc.py` -> `test_calc`).
    pub fn file_stem(&self) -> Option<String> {
        self.file
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
    }
}

/// Coarse category of a test failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingModule,
    MissingSymbol,
    AssertionMismatch,
    SyntaxError,
    TypeError,
    NameError,
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::MissingModule => "missing_module",
            FailureKind::MissingSymbol => "missing_symbol",
            FailureKind::AssertionMismatch => "assertion_mismatch",
            FailureKind::SyntaxError => "syntax_error",
            FailureKind::TypeError => "type_error",
            FailureKind::NameError => "name_error",
            FailureKind::Unknown => "unknown",
        }
    }
}

/// Structured fields extracted from a diagnostic, when the format permits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum FailureDetail {
    None,
    MissingModule {
        /// Dotted module path, e.g. `math_app.calculator`.
        module: String,
    },
    MissingSymbol {
        /// Module path or type name the symbol was looked up on.
        target: String,
        symbol: String,
        /// True when `target` names a class or instance type rather than a module.
        target_is_type: bool,
    },
    Assertion {
        expression: String,
    },
    Syntax {
        file: Option<String>,
        line: Option<u32>,
    },
    Type {
        message: String,
    },
    Name {
        name: String,
    },
}

/// Output of a [`FailureClassifier`](crate::core::classifier::FailureClassifier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: FailureKind,
    pub detail: FailureDetail,
}

impl Classification {
    pub fn bare(kind: FailureKind) -> Self {
        Self {
            kind,
            detail: FailureDetail::None,
        }
    }
}

/// A classified failure of one test in one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub test: TestRef,
    pub kind: FailureKind,
    pub diagnostic: String,
    pub detail: FailureDetail,
}

/// A candidate source file returned by the code index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Fixed per strategy, in `[0, 1]`.
    pub relevance: f64,
    pub reason: String,
    pub preview: String,
}

/// 1-based inclusive line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

/// A single declarative file edit. Paths are relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileEdit {
    CreateFile {
        path: PathBuf,
        content: String,
    },
    ModifyFile {
        path: PathBuf,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines: Option<LineRange>,
    },
    AppendFile {
        path: PathBuf,
        content: String,
    },
    InsertFile {
        path: PathBuf,
        content: String,
        line: usize,
    },
    DeleteFile {
        path: PathBuf,
    },
}

impl FileEdit {
    pub fn path(&self) -> &Path {
        match self {
            FileEdit::CreateFile { path, .. }
            | FileEdit::ModifyFile { path, .. }
            | FileEdit::AppendFile { path, .. }
            | FileEdit::InsertFile { path, .. }
            | FileEdit::DeleteFile { path } => path,
        }
    }

    /// Short label used in logs, e.g. `create calc.py`.
    pub fn describe(&self) -> String {
        let verb = match self {
            FileEdit::CreateFile { .. } => "create",
            FileEdit::ModifyFile { .. } => "modify",
            FileEdit::AppendFile { .. } => "append",
            FileEdit::InsertFile { .. } => "insert",
            FileEdit::DeleteFile { .. } => "delete",
        };
        format!("{verb} {}", self.path().display())
    }
}

/// Ordered edits proposed in response to one classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationPlan {
    pub failure: TestFailure,
    pub kind: FailureKind,
    pub edits: Vec<FileEdit>,
}

impl ModificationPlan {
    pub fn new(failure: &TestFailure, edits: Vec<FileEdit>) -> Self {
        Self {
            failure: failure.clone(),
            kind: failure.kind,
            edits,
        }
    }

    pub fn empty(failure: &TestFailure) -> Self {
        Self::new(failure, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

/// Tag for each recorded step of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    TestExecution,
    TestAnalysis,
    CodeSearch,
    CodeUnderstanding,
    ModificationPlan,
    ModificationApplied,
    CodeCommit,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::TestExecution => "test_execution",
            StepType::TestAnalysis => "test_analysis",
            StepType::CodeSearch => "code_search",
            StepType::CodeUnderstanding => "code_understanding",
            StepType::ModificationPlan => "modification_plan",
            StepType::ModificationApplied => "modification_applied",
            StepType::CodeCommit => "code_commit",
        }
    }
}
