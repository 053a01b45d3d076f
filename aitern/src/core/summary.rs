//! Line-oriented structural summaries of source files.
//!
//! Summaries are heuristic: each line is matched against a small set of
//! patterns and anything that does not match is skipped. Nothing here parses
//! the language properly.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(.+?)\s*$").expect("static regex"));
static FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+(\S+)\s+import\s+(.+?)\s*$").expect("static regex")
});
static CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)class\s+([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?\s*:").expect("static regex")
});
static DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(([^)]*)\)\s*(?:->\s*([^:]+?))?\s*:")
        .expect("static regex")
});

/// Source language, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Other,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") | Some("pyi") => Language::Python,
            Some("js") | Some("jsx") | Some("mjs") => Language::JavaScript,
            Some("ts") | Some("tsx") => Language::TypeScript,
            _ => Language::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum Import {
    /// `import a.b, c as d`
    Module { modules: Vec<String> },
    /// `from a.b import x, y`
    From { module: String, names: Vec<String> },
}

impl Import {
    /// Modules this import pulls in, for prompt context.
    pub fn module_names(&self) -> Vec<String> {
        match self {
            Import::Module { modules } => modules.clone(),
            Import::From { module, .. } => vec![module.clone()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub bases: Vec<String>,
    /// 1-based line of the declaration header.
    pub line: usize,
    /// Leading whitespace width of the header.
    pub indent: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callable {
    pub name: String,
    pub params: Vec<String>,
    pub return_type: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralSummary {
    pub path: PathBuf,
    pub language: Language,
    pub imports: Vec<Import>,
    pub types: Vec<TypeDecl>,
    pub callables: Vec<Callable>,
    /// Content length in bytes.
    pub size: usize,
}

impl StructuralSummary {
    pub fn find_type(&self, name: &str) -> Option<&TypeDecl> {
        self.types.iter().find(|decl| decl.name == name)
    }
}

/// Summarize `content`. Non-Python files get language and size only.
pub fn summarize_source(path: &Path, content: &str) -> StructuralSummary {
    let language = Language::from_path(path);
    let mut summary = StructuralSummary {
        path: path.to_path_buf(),
        language,
        imports: Vec::new(),
        types: Vec::new(),
        callables: Vec::new(),
        size: content.len(),
    };
    if language != Language::Python {
        return summary;
    }

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if let Some(caps) = FROM_IMPORT.captures(line) {
            summary.imports.push(Import::From {
                module: caps[1].to_string(),
                names: split_list(&caps[2]),
            });
        } else if let Some(caps) = IMPORT.captures(line) {
            summary.imports.push(Import::Module {
                modules: split_list(&caps[1]),
            });
        } else if let Some(caps) = CLASS.captures(line) {
            summary.types.push(TypeDecl {
                name: caps[2].to_string(),
                bases: caps.get(3).map(|m| split_list(m.as_str())).unwrap_or_default(),
                line: line_no,
                indent: caps[1].len(),
            });
        } else if let Some(caps) = DEF.captures(line) {
            summary.callables.push(Callable {
                name: caps[2].to_string(),
                params: split_list(&caps[3]),
                return_type: caps.get(4).map(|m| m.as_str().trim().to_string()),
                line: line_no,
            });
        }
    }
    summary
}

/// Split a comma list, dropping `as` aliases, parentheses and empties.
fn split_list(raw: &str) -> Vec<String> {
    raw.trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(|part| {
            let part = part.trim();
            part.split_once(" as ").map_or(part, |(name, _)| name.trim())
        })
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
