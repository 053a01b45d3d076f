//! Deterministic, pure logic for the exploration loop.
//!
//! Core modules must be free of I/O side effects. They parse runner output,
//! classify failures, summarize source text and plan edits, all on in-memory
//! data suitable for tests.

pub mod classifier;
pub mod path;
pub mod planner;
pub mod report;
pub mod summary;
pub mod types;
