//! Stable exit codes for aitern CLI commands.

/// Command succeeded; for `explore`, the selected tests pass.
pub const OK: i32 = 0;
/// Setup, config, git or I/O error.
pub const ERROR: i32 = 1;
/// `aitern explore` spent its iteration budget without a passing run.
pub const EXHAUSTED: i32 = 2;
/// `aitern apply` refused a session that did not succeed.
pub const APPLY_REFUSED: i32 = 3;
