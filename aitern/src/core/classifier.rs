//! Deterministic classification of test failure diagnostics.
//!
//! Detection order matters: pytest echoes the failing source line (often an
//! `assert` statement) above the real exception, so specific exception types
//! are checked before assertion mismatches.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Classification, FailureDetail, FailureKind};

/// Maps raw diagnostic text to a failure kind. Implementations must be total.
pub trait FailureClassifier {
    fn classify(&self, diagnostic: &str) -> Classification;
}

static NO_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"No module named '([^']+)'").expect("static regex"));
static CANNOT_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"cannot import name '([^']+)' from '([^']+)'").expect("static regex")
});
static MODULE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"module '([^']+)' has no attribute '([^']+)'").expect("static regex")
});
static TYPE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:type object )?'([^']+)'(?: object)? has no attribute '([^']+)'")
        .expect("static regex")
});
static SYNTAX_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("static regex"));
static NAME_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"name '([^']+)' is not defined").expect("static regex"));
static TYPE_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TypeError: (.+)").expect("static regex"));
static ASSERT_EXPR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:E\s+)?assert\s+(.+)$").expect("static regex"));

/// Regex-based classifier for Python/pytest diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternClassifier;

impl FailureClassifier for PatternClassifier {
    fn classify(&self, diagnostic: &str) -> Classification {
        if let Some(c) = missing_module(diagnostic) {
            return c;
        }
        if let Some(c) = missing_symbol(diagnostic) {
            return c;
        }
        if let Some(c) = syntax_error(diagnostic) {
            return c;
        }
        if diagnostic.contains("NameError") {
            let detail = NAME_ERROR
                .captures(diagnostic)
                .map(|caps| FailureDetail::Name {
                    name: caps[1].to_string(),
                })
                .unwrap_or(FailureDetail::None);
            return Classification {
                kind: FailureKind::NameError,
                detail,
            };
        }
        if diagnostic.contains("TypeError") {
            let detail = TYPE_ERROR
                .captures(diagnostic)
                .map(|caps| FailureDetail::Type {
                    message: caps[1].trim().to_string(),
                })
                .unwrap_or(FailureDetail::None);
            return Classification {
                kind: FailureKind::TypeError,
                detail,
            };
        }
        if let Some(caps) = ASSERT_EXPR.captures(diagnostic) {
            return Classification {
                kind: FailureKind::AssertionMismatch,
                detail: FailureDetail::Assertion {
                    expression: caps[1].trim().to_string(),
                },
            };
        }
        if diagnostic.contains("AssertionError") {
            return Classification::bare(FailureKind::AssertionMismatch);
        }
        Classification::bare(FailureKind::Unknown)
    }
}

fn missing_module(diagnostic: &str) -> Option<Classification> {
    if let Some(caps) = NO_MODULE.captures(diagnostic) {
        return Some(Classification {
            kind: FailureKind::MissingModule,
            detail: FailureDetail::MissingModule {
                module: caps[1].to_string(),
            },
        });
    }
    if diagnostic.contains("ModuleNotFoundError") {
        return Some(Classification::bare(FailureKind::MissingModule));
    }
    None
}

fn missing_symbol(diagnostic: &str) -> Option<Classification> {
    if let Some(caps) = CANNOT_IMPORT.captures(diagnostic) {
        return Some(symbol(&caps[2], &caps[1], false));
    }
    if let Some(caps) = MODULE_ATTR.captures(diagnostic) {
        return Some(symbol(&caps[1], &caps[2], false));
    }
    if let Some(caps) = TYPE_ATTR.captures(diagnostic) {
        return Some(symbol(&caps[1], &caps[2], true));
    }
    if diagnostic.contains("AttributeError") || diagnostic.contains("ImportError") {
        return Some(Classification::bare(FailureKind::MissingSymbol));
    }
    None
}

fn symbol(target: &str, symbol: &str, target_is_type: bool) -> Classification {
    Classification {
        kind: FailureKind::MissingSymbol,
        detail: FailureDetail::MissingSymbol {
            target: target.to_string(),
            symbol: symbol.to_string(),
            target_is_type,
        },
    }
}

fn syntax_error(diagnostic: &str) -> Option<Classification> {
    let hit = ["SyntaxError", "IndentationError", "TabError"]
        .iter()
        .any(|needle| diagnostic.contains(needle));
    if !hit {
        return None;
    }
    let detail = match SYNTAX_LOCATION.captures(diagnostic) {
        Some(caps) => FailureDetail::Syntax {
            file: Some(caps[1].to_string()),
            line: caps[2].parse().ok(),
        },
        None => FailureDetail::Syntax {
            file: None,
            line: None,
        },
    };
    Some(Classification {
        kind: FailureKind::SyntaxError,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Classification {
        PatternClassifier.classify(text)
    }

    #[test]
    fn missing_module_extracts_dotted_path() {
        let c = classify("E   ModuleNotFoundError: No module named 'math_app.calculator'");
        assert_eq!(c.kind, FailureKind::MissingModule);
        assert_eq!(
            c.detail,
            FailureDetail::MissingModule {
                module: "math_app.calculator".to_string()
            }
        );
    }

    #[test]
    fn module_not_found_without_name_degrades_to_kind() {
        let c = classify("ModuleNotFoundError");
        assert_eq!(c, Classification::bare(FailureKind::MissingModule));
    }

    #[test]
    fn cannot_import_name_is_missing_symbol_on_module() {
        let c = classify("ImportError: cannot import name 'add' from 'calc' (/tmp/calc.py)");
        assert_eq!(c.kind, FailureKind::MissingSymbol);
        assert_eq!(
            c.detail,
            FailureDetail::MissingSymbol {
                target: "calc".to_string(),
                symbol: "add".to_string(),
                target_is_type: false,
            }
        );
    }

    #[test]
    fn object_attribute_error_targets_type() {
        let c = classify("E   AttributeError: 'Calculator' object has no attribute 'multiply'");
        assert_eq!(
            c.detail,
            FailureDetail::MissingSymbol {
                target: "Calculator".to_string(),
                symbol: "multiply".to_string(),
                target_is_type: true,
            }
        );
    }

    #[test]
    fn module_attribute_error_targets_module() {
        let c = classify("AttributeError: module 'calc' has no attribute 'div'");
        assert_eq!(
            c.detail,
            FailureDetail::MissingSymbol {
                target: "calc".to_string(),
                symbol: "div".to_string(),
                target_is_type: false,
            }
        );
    }

    #[test]
    fn type_error_wins_over_echoed_assert_line() {
        let text = ">       assert calc.add(2, 3) == 5\nE       TypeError: add() takes 0 positional arguments but 2 were given";
        let c = classify(text);
        assert_eq!(c.kind, FailureKind::TypeError);
        assert_eq!(
            c.detail,
            FailureDetail::Type {
                message: "add() takes 0 positional arguments but 2 were given".to_string()
            }
        );
    }

    #[test]
    fn assertion_extracts_expression() {
        let c = classify(">       assert add(2, 3) == 5\nE       assert None == 5");
        assert_eq!(c.kind, FailureKind::AssertionMismatch);
        assert_eq!(
            c.detail,
            FailureDetail::Assertion {
                expression: "None == 5".to_string()
            }
        );
    }

    #[test]
    fn syntax_error_extracts_location() {
        let text = "E     File \"/repo/calc.py\", line 3\nE       def add(a, b)\nE   SyntaxError: expected ':'";
        let c = classify(text);
        assert_eq!(c.kind, FailureKind::SyntaxError);
        assert_eq!(
            c.detail,
            FailureDetail::Syntax {
                file: Some("/repo/calc.py".to_string()),
                line: Some(3),
            }
        );
    }

    #[test]
    fn name_error_extracts_name() {
        let c = classify("E       NameError: name 'Calculator' is not defined");
        assert_eq!(c.kind, FailureKind::NameError);
        assert_eq!(
            c.detail,
            FailureDetail::Name {
                name: "Calculator".to_string()
            }
        );
    }

    #[test]
    fn unrecognized_text_is_unknown() {
        let c = classify("E   NotImplementedError: add");
        assert_eq!(c, Classification::bare(FailureKind::Unknown));
        assert_eq!(classify(""), Classification::bare(FailureKind::Unknown));
    }

    #[test]
    fn classification_is_deterministic() {
        let text = "E   ModuleNotFoundError: No module named 'calc'";
        let first = classify(text);
        for _ in 0..10 {
            assert_eq!(classify(text), first);
        }
    }
}
