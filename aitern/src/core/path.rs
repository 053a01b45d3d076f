//! Lexical path containment checks for edit targets.
//!
//! Edit paths come from planners (and ultimately from generated text), so they
//! are normalized without touching the filesystem and must stay under the
//! project root.

use std::path::{Component, Path, PathBuf};

use crate::error::PlanError;

/// Normalize `.` and `..` components lexically. Returns `None` when `..`
/// climbs above the start of a relative path.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut out: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop()?;
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out.iter().collect())
}

/// Resolve `rel` against `root`, rejecting absolute paths and escapes.
pub fn resolve_within(root: &Path, rel: &Path) -> Result<PathBuf, PlanError> {
    let escape = || PlanError::PathEscape {
        path: rel.to_path_buf(),
    };
    let normalized = normalize_relative(rel).ok_or_else(escape)?;
    if normalized.as_os_str().is_empty() {
        return Err(escape());
    }
    Ok(root.join(normalized))
}

/// Convert a dotted module path into a relative file path (`a.b` -> `a/b.py`).
pub fn module_to_path(module: &str, ext: &str) -> PathBuf {
    let mut path: PathBuf = module.split('.').filter(|part| !part.is_empty()).collect();
    path.set_extension(ext);
    path
}

/// Render a path with `/` separators for records and search queries.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
