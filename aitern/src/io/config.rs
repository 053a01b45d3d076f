//! Project configuration stored at `.aitern/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::atomic::write_atomic;

/// Exploration configuration (TOML).
///
/// Edited by humans; every field has a default so a missing file or a partial
/// file both load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiternConfig {
    /// Iteration budget for `explore` when `--max-iterations` is not given.
    pub max_iterations: u32,
    /// Directory holding the test suite, relative to the project root.
    pub test_dir: PathBuf,
    /// Directory new modules are created in, relative to the project root.
    pub source_dir: PathBuf,
    /// Where session records are written, relative to the project root.
    pub record_dir: PathBuf,
    /// Prefix for exploration branch names.
    pub branch_prefix: String,
    pub test: TestConfig,
    pub search: SearchConfig,
    pub git: GitConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    /// Runner command prefix; pytest flags and selection are appended.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    /// Source file extensions searched and snapshotted.
    pub extensions: Vec<String>,
    /// Semantic search runs only when fewer results than this were found.
    pub min_results: usize,
    pub preview_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub push_on_success: bool,
    pub remote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Adds the generation-backed planner behind the stub planner.
    pub enabled: bool,
    /// Command that reads a prompt on stdin and prints a completion.
    pub command: Vec<String>,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f64,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for AiternConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            test_dir: PathBuf::from("tests"),
            source_dir: PathBuf::from("."),
            record_dir: PathBuf::from(".aitern/explorations"),
            branch_prefix: "aitern/".to_string(),
            test: TestConfig::default(),
            search: SearchConfig::default(),
            git: GitConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
            ],
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string()],
            min_results: 3,
            preview_chars: 200,
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            push_on_success: false,
            remote: "origin".to_string(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: Vec::new(),
            model: "gpt-4".to_string(),
            api_key_env: "AITERN_API_KEY".to_string(),
            temperature: 0.2,
            max_retries: 3,
            timeout_secs: 120,
        }
    }
}

impl TestConfig {
    /// Python interpreter behind the test command: its program when that is a
    /// Python executable (`python3`, `.venv/bin/python`), else `python`.
    pub fn interpreter(&self) -> &str {
        self.command
            .first()
            .filter(|program| {
                Path::new(program.as_str())
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("python"))
            })
            .map_or("python", String::as_str)
    }
}

impl AiternConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.test_dir.as_os_str().is_empty() {
            return Err(anyhow!("test_dir must not be empty"));
        }
        if self.record_dir.as_os_str().is_empty() {
            return Err(anyhow!("record_dir must not be empty"));
        }
        if self.branch_prefix.chars().any(char::is_whitespace) {
            return Err(anyhow!("branch_prefix must not contain whitespace"));
        }
        if self.test.command.first().is_none_or(|cmd| cmd.trim().is_empty()) {
            return Err(anyhow!("test.command must be a non-empty array"));
        }
        if self.test.timeout_secs == 0 {
            return Err(anyhow!("test.timeout_secs must be > 0"));
        }
        if self.test.output_limit_bytes == 0 {
            return Err(anyhow!("test.output_limit_bytes must be > 0"));
        }
        if self.search.extensions.is_empty() {
            return Err(anyhow!("search.extensions must not be empty"));
        }
        if self.git.remote.trim().is_empty() {
            return Err(anyhow!("git.remote must not be empty"));
        }
        let generator = &self.generator;
        if generator.enabled
            && generator
                .command
                .first()
                .is_none_or(|cmd| cmd.trim().is_empty())
        {
            return Err(anyhow!(
                "generator.command must be a non-empty array when the generator is enabled"
            ));
        }
        if !(0.0..=2.0).contains(&generator.temperature) {
            return Err(anyhow!("generator.temperature must be within 0.0..=2.0"));
        }
        if generator.max_retries == 0 {
            return Err(anyhow!("generator.max_retries must be > 0"));
        }
        if generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Apply `AITERN_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("AITERN_MAX_ITERATIONS") {
            self.max_iterations = raw
                .trim()
                .parse()
                .with_context(|| format!("parse AITERN_MAX_ITERATIONS={raw}"))?;
        }
        if let Some(dir) = lookup("AITERN_TEST_DIR") {
            self.test_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("AITERN_RECORD_DIR") {
            self.record_dir = PathBuf::from(dir);
        }
        if let Some(model) = lookup("AITERN_AI_MODEL") {
            self.generator.model = model;
        }
        Ok(())
    }

    /// API key from the variable named by `generator.api_key_env`.
    pub fn api_key(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        lookup(&self.generator.api_key_env).filter(|key| !key.trim().is_empty())
    }
}

/// Load config from a TOML file; a missing file yields defaults.
pub fn load_config(path: &Path) -> Result<AiternConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = AiternConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AiternConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Load, then apply process environment overrides and re-validate.
pub fn load_config_with_env(path: &Path) -> Result<AiternConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    cfg.validate().context("invalid config after environment overrides")?;
    Ok(cfg)
}

pub fn write_config(path: &Path, cfg: &AiternConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}
