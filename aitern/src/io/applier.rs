//! Applies declarative file edits to the working tree.
//!
//! Edits run in order and stop at the first failure. Each edit writes through
//! a temp file and rename, so a failing edit leaves its target untouched while
//! earlier edits stay applied.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::path::resolve_within;
use crate::core::types::{FileEdit, LineRange, ModificationPlan};
use crate::io::atomic::write_atomic;

/// Outcome of applying one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: Vec<FileEdit>,
    pub failed: Option<FailedEdit>,
    pub unapplied: Vec<FileEdit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEdit {
    pub edit: FileEdit,
    pub error: String,
}

impl ApplyReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_none() && self.unapplied.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ModificationApplier {
    root: PathBuf,
}

impl ModificationApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[instrument(skip_all, fields(edits = plan.edits.len(), kind = plan.kind.as_str()))]
    pub fn apply(&self, plan: &ModificationPlan) -> ApplyReport {
        // Containment is checked for the whole plan before anything is written.
        let escaping = plan.edits.iter().enumerate().find_map(|(idx, edit)| {
            resolve_within(&self.root, edit.path())
                .err()
                .map(|err| (idx, err))
        });
        if let Some((idx, err)) = escaping {
            warn!(err = %err, "plan rejected");
            let mut unapplied = plan.edits.clone();
            let edit = unapplied.remove(idx);
            return ApplyReport {
                applied: Vec::new(),
                failed: Some(FailedEdit {
                    edit,
                    error: err.to_string(),
                }),
                unapplied,
            };
        }

        let mut applied = Vec::new();
        for (idx, edit) in plan.edits.iter().enumerate() {
            match self.apply_edit(edit) {
                Ok(()) => {
                    debug!(edit = %edit.describe(), "applied edit");
                    applied.push(edit.clone());
                }
                Err(err) => {
                    warn!(edit = %edit.describe(), err = %format!("{err:#}"), "edit failed");
                    return ApplyReport {
                        applied,
                        failed: Some(FailedEdit {
                            edit: edit.clone(),
                            error: format!("{err:#}"),
                        }),
                        unapplied: plan.edits[idx + 1..].to_vec(),
                    };
                }
            }
        }
        ApplyReport {
            applied,
            failed: None,
            unapplied: Vec::new(),
        }
    }

    fn apply_edit(&self, edit: &FileEdit) -> Result<()> {
        let target = resolve_within(&self.root, edit.path())?;
        match edit {
            FileEdit::CreateFile { content, .. } => write_atomic(&target, content.as_bytes()),
            FileEdit::ModifyFile { content, lines, .. } => match lines {
                None => write_atomic(&target, content.as_bytes()),
                Some(range) => {
                    let current = read_existing(&target)?;
                    let updated = replace_lines(&current, *range, content)?;
                    write_atomic(&target, updated.as_bytes())
                }
            },
            FileEdit::AppendFile { content, .. } => {
                let mut current = match fs::read_to_string(&target) {
                    Ok(current) => current,
                    Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
                    Err(err) => {
                        return Err(err).with_context(|| format!("read {}", target.display()));
                    }
                };
                current.push_str(content);
                write_atomic(&target, current.as_bytes())
            }
            FileEdit::InsertFile { content, line, .. } => {
                let current = read_existing(&target)?;
                let updated = insert_at_line(&current, *line, content)?;
                write_atomic(&target, updated.as_bytes())
            }
            FileEdit::DeleteFile { .. } => match fs::remove_file(&target) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(path = %target.display(), "delete target already absent");
                    Ok(())
                }
                Err(err) => Err(err).with_context(|| format!("delete {}", target.display())),
            },
        }
    }
}

fn read_existing(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Split into lines keeping terminators, so untouched lines round-trip.
fn split_lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

fn ensure_newline(content: &str) -> String {
    let mut owned = content.to_string();
    if !owned.is_empty() && !owned.ends_with('\n') {
        owned.push('\n');
    }
    owned
}

/// Replace 1-based inclusive `range` with `content`.
fn replace_lines(current: &str, range: LineRange, content: &str) -> Result<String> {
    let lines = split_lines(current);
    if range.start == 0 || range.start > range.end || range.end > lines.len() {
        return Err(anyhow!(
            "line range {}..={} out of bounds for {} lines",
            range.start,
            range.end,
            lines.len()
        ));
    }
    let mut out = String::with_capacity(current.len() + content.len());
    for line in &lines[..range.start - 1] {
        out.push_str(line);
    }
    out.push_str(&ensure_newline(content));
    for line in &lines[range.end..] {
        out.push_str(line);
    }
    Ok(out)
}

/// Insert `content` so it starts at 1-based `line`; `len + 1` appends.
fn insert_at_line(current: &str, line: usize, content: &str) -> Result<String> {
    let lines = split_lines(current);
    if line == 0 || line > lines.len() + 1 {
        return Err(anyhow!(
            "insert line {line} out of bounds for {} lines",
            lines.len()
        ));
    }
    let mut out = String::with_capacity(current.len() + content.len() + 1);
    for existing in &lines[..line - 1] {
        out.push_str(existing);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&ensure_newline(content));
    for existing in &lines[line - 1..] {
        out.push_str(existing);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FailureDetail, FailureKind, TestFailure, TestRef};

    fn plan(edits: Vec<FileEdit>) -> ModificationPlan {
        let failure = TestFailure {
            test: TestRef::from_node_id("tests/test_calc.py::test_add"),
            kind: FailureKind::Unknown,
            diagnostic: String::new(),
            detail: FailureDetail::None,
        };
        ModificationPlan::new(&failure, edits)
    }

    fn create(path: &str, content: &str) -> FileEdit {
        FileEdit::CreateFile {
            path: PathBuf::from(path),
            content: content.to_string(),
        }
    }

    #[test]
    fn create_makes_parent_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ModificationApplier::new(temp.path())
            .apply(&plan(vec![create("pkg/sub/calc.py", "x = 1\n")]));
        assert!(report.succeeded());
        assert_eq!(
            fs::read_to_string(temp.path().join("pkg/sub/calc.py")).expect("read"),
            "x = 1\n"
        );
    }

    #[test]
    fn modify_line_range_replaces_inclusive_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("calc.py"), "a\nb\nc\nd\n").expect("write");
        let report = ModificationApplier::new(temp.path()).apply(&plan(vec![
            FileEdit::ModifyFile {
                path: PathBuf::from("calc.py"),
                content: "B\nC".to_string(),
                lines: Some(LineRange { start: 2, end: 3 }),
            },
        ]));
        assert!(report.succeeded());
        assert_eq!(
            fs::read_to_string(temp.path().join("calc.py")).expect("read"),
            "a\nB\nC\nd\n"
        );
    }

    #[test]
    fn modify_with_out_of_range_lines_fails_and_leaves_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let original = "a\nb\nc\n";
        fs::write(temp.path().join("calc.py"), original).expect("write");
        let applier = ModificationApplier::new(temp.path());

        for range in [
            LineRange { start: 3, end: 4 },
            LineRange { start: 5, end: 5 },
            LineRange { start: 0, end: 1 },
            LineRange { start: 3, end: 2 },
        ] {
            let edit = FileEdit::ModifyFile {
                path: PathBuf::from("calc.py"),
                content: "X\n".to_string(),
                lines: Some(range),
            };
            let report = applier.apply(&plan(vec![edit.clone()]));
            assert!(!report.succeeded(), "{range:?} should fail");
            assert!(report.applied.is_empty());
            let failed = report.failed.expect("failed");
            assert_eq!(failed.edit, edit);
            assert!(failed.error.contains("out of bounds"), "{}", failed.error);
            assert_eq!(
                fs::read_to_string(temp.path().join("calc.py")).expect("read"),
                original
            );
        }
    }

    #[test]
    fn insert_and_append() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("calc.py"), "class C:\n    pass").expect("write");
        let report = ModificationApplier::new(temp.path()).apply(&plan(vec![
            FileEdit::InsertFile {
                path: PathBuf::from("calc.py"),
                content: "    def m(self):\n        return 1\n".to_string(),
                line: 2,
            },
            FileEdit::AppendFile {
                path: PathBuf::from("calc.py"),
                content: "\nX = 1\n".to_string(),
            },
            FileEdit::AppendFile {
                path: PathBuf::from("new.py"),
                content: "Y = 2\n".to_string(),
            },
        ]));
        assert!(report.succeeded());
        assert_eq!(
            fs::read_to_string(temp.path().join("calc.py")).expect("read"),
            "class C:\n    def m(self):\n        return 1\n    pass\nX = 1\n"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("new.py")).expect("read"),
            "Y = 2\n"
        );
    }

    #[test]
    fn insert_past_end_plus_one_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("calc.py"), "a\n").expect("write");
        let report = ModificationApplier::new(temp.path()).apply(&plan(vec![
            FileEdit::InsertFile {
                path: PathBuf::from("calc.py"),
                content: "b\n".to_string(),
                line: 2,
            },
            FileEdit::InsertFile {
                path: PathBuf::from("calc.py"),
                content: "z\n".to_string(),
                line: 9,
            },
        ]));
        assert!(!report.succeeded());
        assert_eq!(report.applied.len(), 1);
        assert!(report.failed.expect("failed").error.contains("out of bounds"));
        assert_eq!(
            fs::read_to_string(temp.path().join("calc.py")).expect("read"),
            "a\nb\n"
        );
    }

    #[test]
    fn failing_edit_stops_the_plan() {
        let temp = tempfile::tempdir().expect("tempdir");
        let edits = vec![
            create("one.py", "1\n"),
            FileEdit::ModifyFile {
                path: PathBuf::from("missing.py"),
                content: "x\n".to_string(),
                lines: Some(LineRange { start: 1, end: 1 }),
            },
            create("three.py", "3\n"),
        ];
        let report = ModificationApplier::new(temp.path()).apply(&plan(edits.clone()));

        assert_eq!(report.applied, vec![edits[0].clone()]);
        assert_eq!(report.failed.as_ref().map(|f| &f.edit), Some(&edits[1]));
        assert_eq!(report.unapplied, vec![edits[2].clone()]);
        assert!(temp.path().join("one.py").exists());
        assert!(!temp.path().join("missing.py").exists());
        assert!(!temp.path().join("three.py").exists());
    }

    #[test]
    fn delete_of_missing_file_is_ok() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("old.py"), "").expect("write");
        let report = ModificationApplier::new(temp.path()).apply(&plan(vec![
            FileEdit::DeleteFile {
                path: PathBuf::from("old.py"),
            },
            FileEdit::DeleteFile {
                path: PathBuf::from("never.py"),
            },
        ]));
        assert!(report.succeeded());
        assert!(!temp.path().join("old.py").exists());
    }

    #[test]
    fn escaping_plan_is_rejected_before_any_write() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ModificationApplier::new(temp.path()).apply(&plan(vec![
            create("ok.py", "1\n"),
            create("../escape.py", "2\n"),
        ]));
        assert!(report.applied.is_empty());
        let failed = report.failed.expect("failed");
        assert_eq!(failed.edit.path(), Path::new("../escape.py"));
        assert!(failed.error.contains("outside the project root"));
        assert_eq!(report.unapplied.len(), 1);
        assert!(!temp.path().join("ok.py").exists());
    }
}
