//! aitern command line.
//!
//! `init` scaffolds `.aitern/`, `explore` runs a session on a fresh branch,
//! `list` shows recorded sessions and `apply` merges a successful one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use aitern::apply::{ApplyRefused, apply_session};
use aitern::core::planner::{KindPlanner, LayeredPlanner, ModificationPlanner};
use aitern::engine::ExplorationEngine;
use aitern::exit_codes;
use aitern::io::branch::GitBranchCoordinator;
use aitern::io::config::{AiternConfig, TestConfig, load_config_with_env};
use aitern::io::generator::{
    CommandGenerator, GenerationConfig, GenerativePlanner, PythonSyntaxChecker,
};
use aitern::io::git::Git;
use aitern::io::init::{AiternPaths, InitOptions, init_project};
use aitern::io::recorder::ExplorationRecorder;
use aitern::io::test_runner::PytestRunner;
use aitern::logging;

#[derive(Parser)]
#[command(
    name = "aitern",
    version,
    about = "Test-driven code exploration on isolated git branches"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.aitern/config.toml` and `.aitern/.gitignore`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the exploration loop until the selected tests pass.
    Explore {
        /// Test file names, modules or paths to select (default: all tests).
        #[arg(long = "tests", num_args = 1..)]
        tests: Vec<String>,
        /// Iteration budget (overrides the config).
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Config file (default: `.aitern/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Merge a successful session's branch into its base branch.
    Apply {
        session_id: String,
    },
    /// List recorded sessions, newest first.
    List,
}

fn main() {
    logging::init("info");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            let code = if err.downcast_ref::<ApplyRefused>().is_some() {
                exit_codes::APPLY_REFUSED
            } else {
                exit_codes::ERROR
            };
            std::process::exit(code);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli
        .project
        .canonicalize()
        .with_context(|| format!("resolve project root {}", cli.project.display()))?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Explore {
            tests,
            max_iterations,
            config,
        } => cmd_explore(&root, &tests, max_iterations, config.as_deref()),
        Command::Apply { session_id } => cmd_apply(&root, &session_id),
        Command::List => cmd_list(&root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn load(root: &Path, config: Option<&Path>) -> Result<AiternConfig> {
    let paths = AiternPaths::new(root);
    let path = config.map_or_else(|| paths.config_path.clone(), |p| root.join(p));
    load_config_with_env(&path)
}

fn planner(root: &Path, cfg: &AiternConfig) -> Box<dyn ModificationPlanner> {
    let mut layers: Vec<Box<dyn ModificationPlanner>> = vec![Box::new(KindPlanner)];
    if cfg.generator.enabled {
        let api_key = cfg.api_key(|key| std::env::var(key).ok());
        let generator = CommandGenerator::new(
            root,
            GenerationConfig::from_config(&cfg.generator, api_key),
        );
        layers.push(Box::new(GenerativePlanner::new(
            root,
            generator,
            PythonSyntaxChecker::new(interpreter(root, &cfg.test)),
            PytestRunner::new(root, cfg.test.clone()),
            cfg.generator.max_retries,
        )));
    }
    Box::new(LayeredPlanner::new(layers))
}

/// The test command's interpreter; paths like `.venv/bin/python` are taken
/// relative to the project root.
fn interpreter(root: &Path, test: &TestConfig) -> String {
    let python = test.interpreter();
    if python.contains(['/', '\\']) {
        root.join(python).to_string_lossy().into_owned()
    } else {
        python.to_string()
    }
}

fn cmd_explore(
    root: &Path,
    tests: &[String],
    max_iterations: Option<u32>,
    config: Option<&Path>,
) -> Result<i32> {
    let mut cfg = load(root, config)?;
    if let Some(max) = max_iterations {
        cfg.max_iterations = max;
        cfg.validate().context("invalid --max-iterations")?;
    }
    let budget = cfg.max_iterations;
    let runner = PytestRunner::new(root, cfg.test.clone());
    let branches = GitBranchCoordinator::new(Git::new(root));
    let planner = planner(root, &cfg);

    let mut engine = ExplorationEngine::new(root, cfg, runner, branches, planner);
    let session_id = engine.start_session(tests)?;
    println!("session {session_id}");
    let result = engine.run_iterations(budget)?;

    println!(
        "{} after {} iteration(s) on {}",
        if result.success { "passed" } else { "exhausted" },
        result.iterations_run,
        result.branch
    );
    println!("record {}", result.record_path.display());
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::EXHAUSTED
    })
}

fn cmd_apply(root: &Path, session_id: &str) -> Result<i32> {
    let cfg = load(root, None)?;
    let recorder = ExplorationRecorder::new(AiternPaths::new(root).record_dir(&cfg));
    let branches = GitBranchCoordinator::new(Git::new(root));
    let session = apply_session(&recorder, &branches, session_id)?;
    println!("merged {} into {}", session.branch, session.base_branch);
    Ok(exit_codes::OK)
}

fn cmd_list(root: &Path) -> Result<i32> {
    let cfg = load(root, None)?;
    let recorder = ExplorationRecorder::new(AiternPaths::new(root).record_dir(&cfg));
    for session in recorder.history()? {
        println!(
            "{}\t{}\t{} steps\t{}",
            session.id,
            if session.success { "success" } else { "failed" },
            session.steps.len(),
            session.branch
        );
    }
    Ok(exit_codes::OK)
}
