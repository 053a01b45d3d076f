//! Test-driven code exploration.
//!
//! aitern runs a project's test suite, classifies the failures, looks up the
//! source files involved and applies planned edits on an isolated git branch,
//! repeating until the tests pass or the iteration budget runs out. Every step
//! is recorded so a session can be inspected and merged later.
//!
//! - **[`core`]**: Pure logic (report parsing, classification, summaries,
//!   planning, path containment). No I/O.
//! - **[`io`]**: Filesystem, git and subprocess adapters behind traits so the
//!   loop can be driven by fakes in tests.
//!
//! [`engine`] drives the loop; [`apply`] merges finished sessions.

pub mod apply;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
