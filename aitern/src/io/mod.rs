//! Filesystem, git and subprocess adapters for the exploration loop.

pub mod applier;
pub mod atomic;
pub mod branch;
pub mod code_index;
pub mod config;
pub mod generator;
pub mod git;
pub mod init;
pub mod process;
pub mod prompt;
pub mod recorder;
pub mod snapshot;
pub mod suite;
pub mod test_runner;
