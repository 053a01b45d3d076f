//! Generation-backed planning.
//!
//! A [`Generator`] turns a prompt into candidate source for one file. The
//! [`GenerativePlanner`] wraps it in a bounded retry loop: each candidate must
//! parse and must make the failing test pass in an isolated trial before it
//! becomes a plan. Rejections are fed back into the next attempt.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::path::{normalize_relative, resolve_within};
use crate::core::planner::{ModificationPlanner, PlanContext, module_target};
use crate::core::summary::{Language, summarize_source};
use crate::core::types::{FailureDetail, FileEdit, ModificationPlan, TestFailure};
use crate::error::GenerationExhausted;
use crate::io::atomic::write_atomic;
use crate::io::code_index::INFERENCE_RELEVANCE;
use crate::io::config::GeneratorConfig;
use crate::io::process::run_bounded;
use crate::io::prompt::render_generation_prompt;
use crate::io::suite::TestSelector;
use crate::io::test_runner::TestRunner;

const GENERATOR_OUTPUT_LIMIT: usize = 1_000_000;
const MAX_RELATED_FILES: usize = 3;

static PYTHON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py)[ \t]*\r?\n(.*?)\r?\n```").expect("static regex")
});
static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[\w+-]*[ \t]*\r?\n(.*?)\r?\n```").expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedFile {
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedAttempt {
    pub code: String,
    pub reason: String,
}

/// Everything the generator sees for one attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub test_name: String,
    pub test_source: String,
    /// File the candidate will replace or create.
    pub target_path: PathBuf,
    pub current_target: Option<String>,
    pub related_files: Vec<RelatedFile>,
    /// Modules imported by the test file.
    pub imports: Vec<String>,
    pub failure: String,
    pub previous_attempt: Option<RejectedAttempt>,
    /// 1-based attempt number.
    pub attempt: u32,
    pub language: Language,
}

pub trait Generator {
    /// Return candidate source for `request.target_path`.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        (**self).generate(request)
    }
}

/// Explicit generator settings; nothing is read from the environment later.
#[derive(Clone)]
pub struct GenerationConfig {
    pub command: Vec<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl GenerationConfig {
    pub fn from_config(cfg: &GeneratorConfig, api_key: Option<String>) -> Self {
        Self {
            command: cfg.command.clone(),
            model: cfg.model.clone(),
            api_key,
            temperature: cfg.temperature,
            timeout: Duration::from_secs(cfg.timeout_secs),
            max_retries: cfg.max_retries,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("command", &self.command)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Pipes the rendered prompt to an external command and reads a completion.
///
/// The child gets `AITERN_MODEL`, `AITERN_TEMPERATURE` and, when configured,
/// `AITERN_API_KEY` in its environment.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    root: PathBuf,
    config: GenerationConfig,
}

impl CommandGenerator {
    pub fn new(root: impl Into<PathBuf>, config: GenerationConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(target = %request.target_path.display(), attempt = request.attempt))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator.command is empty"))?;
        let prompt = render_generation_prompt(request)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.root)
            .env("AITERN_MODEL", &self.config.model)
            .env("AITERN_TEMPERATURE", self.config.temperature.to_string());
        match &self.config.api_key {
            Some(key) => cmd.env("AITERN_API_KEY", key),
            None => cmd.env_remove("AITERN_API_KEY"),
        };

        let output = run_bounded(
            cmd,
            Some(prompt.into_bytes()),
            self.config.timeout,
            GENERATOR_OUTPUT_LIMIT,
        )?;
        if output.timed_out {
            return Err(anyhow!(
                "generator timed out after {}s",
                self.config.timeout.as_secs()
            ));
        }
        if !output.success() {
            return Err(anyhow!(
                "generator exited with {:?}: {}",
                output.exit_code(),
                output.stderr_text().trim()
            ));
        }
        let code = extract_code(&output.stdout_text());
        if code.trim().is_empty() {
            return Err(anyhow!("generator returned no code"));
        }
        Ok(code)
    }
}

/// First fenced block (Python-tagged preferred), else the trimmed text.
pub fn extract_code(text: &str) -> String {
    if let Some(caps) = PYTHON_FENCE.captures(text) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = ANY_FENCE.captures(text) {
        return caps[1].trim().to_string();
    }
    text.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxVerdict {
    Valid,
    Invalid(String),
}

pub trait SyntaxChecker {
    /// `Err` means the checker itself could not run.
    fn check(&self, source: &str) -> Result<SyntaxVerdict>;
}

/// Parses candidates with `python -c ast.parse`, source on stdin.
#[derive(Debug, Clone)]
pub struct PythonSyntaxChecker {
    python: String,
    timeout: Duration,
}

impl Default for PythonSyntaxChecker {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl PythonSyntaxChecker {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            ..Self::default()
        }
    }
}

impl SyntaxChecker for PythonSyntaxChecker {
    fn check(&self, source: &str) -> Result<SyntaxVerdict> {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-c", "import ast, sys; ast.parse(sys.stdin.read())"]);
        let output = run_bounded(
            cmd,
            Some(source.as_bytes().to_vec()),
            self.timeout,
            64 * 1024,
        )?;
        if output.timed_out {
            return Err(anyhow!("syntax check timed out"));
        }
        if output.success() {
            return Ok(SyntaxVerdict::Valid);
        }
        let stderr = output.stderr_text();
        let last = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("syntax check failed");
        Ok(SyntaxVerdict::Invalid(last.trim().to_string()))
    }
}

/// Planner that asks a [`Generator`] for a full replacement of one file.
pub struct GenerativePlanner<G, C, R> {
    root: PathBuf,
    generator: G,
    checker: C,
    runner: R,
    max_retries: u32,
}

impl<G, C, R> GenerativePlanner<G, C, R>
where
    G: Generator,
    C: SyntaxChecker,
    R: TestRunner,
{
    pub fn new(
        root: impl Into<PathBuf>,
        generator: G,
        checker: C,
        runner: R,
        max_retries: u32,
    ) -> Self {
        Self {
            root: root.into(),
            generator,
            checker,
            runner,
            max_retries: max_retries.max(1),
        }
    }

    /// Write `code` over the target, run the failing test, restore the target.
    fn trial(&self, failure: &TestFailure, target: &Path, code: &str) -> Result<Option<String>> {
        let full = resolve_within(&self.root, target)?;
        let original = match fs::read(&full) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err).with_context(|| format!("read {}", full.display())),
        };
        write_atomic(&full, with_newline(code).as_bytes())?;

        let selector = if failure.test.node_id.contains("::") {
            TestSelector::single(&failure.test.file, &failure.test.name)
        } else {
            TestSelector {
                paths: vec![failure.test.file.clone()],
                name_filter: None,
            }
        };
        let outcome = self.runner.run(&selector);

        match &original {
            Some(bytes) => write_atomic(&full, bytes)?,
            None => fs::remove_file(&full)
                .with_context(|| format!("remove trial file {}", full.display()))?,
        }

        match outcome {
            Ok(result) if result.all_passed() => Ok(None),
            Ok(result) => {
                let reasons: Vec<&str> = result
                    .failures
                    .iter()
                    .map(|f| f.diagnostic.as_str())
                    .collect();
                let reason = if reasons.is_empty() {
                    format!(
                        "test did not pass: {} failed, {} errors",
                        result.failed, result.errors
                    )
                } else {
                    reasons.join("\n")
                };
                Ok(Some(reason))
            }
            Err(err) => Ok(Some(format!("trial run failed: {err:#}"))),
        }
    }

    fn request_base(
        &self,
        failure: &TestFailure,
        ctx: &PlanContext,
        target: &Path,
    ) -> GenerationRequest {
        let test_source = read_optional(&self.root.join(&failure.test.file)).unwrap_or_default();
        let imports = summarize_source(&failure.test.file, &test_source)
            .imports
            .iter()
            .flat_map(|import| import.module_names())
            .collect();
        let related_files = ctx
            .search_results
            .iter()
            .filter(|result| result.path != target && result.path != failure.test.file)
            .take(MAX_RELATED_FILES)
            .filter_map(|result| {
                read_optional(&self.root.join(&result.path)).map(|content| RelatedFile {
                    path: result.path.clone(),
                    content,
                })
            })
            .collect();
        GenerationRequest {
            test_name: failure.test.name.clone(),
            test_source,
            target_path: target.to_path_buf(),
            current_target: read_optional(&self.root.join(target)),
            related_files,
            imports,
            failure: failure.diagnostic.clone(),
            previous_attempt: None,
            attempt: 1,
            language: Language::from_path(target),
        }
    }
}

impl<G, C, R> ModificationPlanner for GenerativePlanner<G, C, R>
where
    G: Generator,
    C: SyntaxChecker,
    R: TestRunner,
{
    #[instrument(skip_all, fields(test = %failure.test.node_id))]
    fn plan(&self, failure: &TestFailure, ctx: &PlanContext) -> Result<ModificationPlan> {
        let target = choose_target(failure, ctx);
        let mut request = self.request_base(failure, ctx, &target);
        let existed = request.current_target.is_some();
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=self.max_retries {
            request.attempt = attempt;
            let code = match self.generator.generate(&request) {
                Ok(code) => code,
                Err(err) => {
                    warn!(attempt, err = %format!("{err:#}"), "generation failed");
                    last_reason = format!("generation failed: {err:#}");
                    continue;
                }
            };
            let reason = match self.checker.check(&code)? {
                SyntaxVerdict::Invalid(msg) => Some(format!("syntax error: {msg}")),
                SyntaxVerdict::Valid => self.trial(failure, &target, &code)?,
            };
            match reason {
                None => {
                    info!(attempt, target = %target.display(), "generated candidate accepted");
                    let content = with_newline(&code);
                    let edit = if existed {
                        FileEdit::ModifyFile {
                            path: target,
                            content,
                            lines: None,
                        }
                    } else {
                        FileEdit::CreateFile {
                            path: target,
                            content,
                        }
                    };
                    return Ok(ModificationPlan::new(failure, vec![edit]));
                }
                Some(reason) => {
                    debug!(attempt, %reason, "candidate rejected");
                    last_reason = reason.clone();
                    request.previous_attempt = Some(RejectedAttempt { code, reason });
                }
            }
        }

        Err(GenerationExhausted {
            target,
            attempts: self.max_retries,
            last_reason,
        }
        .into())
    }
}

/// Pick the file a generated candidate should replace.
fn choose_target(failure: &TestFailure, ctx: &PlanContext) -> PathBuf {
    match &failure.detail {
        FailureDetail::MissingModule { module } => return module_target(ctx, module),
        FailureDetail::MissingSymbol {
            target,
            target_is_type: false,
            ..
        } => return module_target(ctx, target),
        _ => {}
    }
    if let Some(inferred) = ctx
        .search_results
        .iter()
        .find(|result| result.relevance >= INFERENCE_RELEVANCE && result.path != failure.test.file)
    {
        return inferred.path.clone();
    }
    // `tests/test_calc.py` -> `<source_dir>/calc.py`
    let stem = failure.test.file_stem().unwrap_or_else(|| failure.test.name.clone());
    let module = stem
        .strip_prefix("test_")
        .or_else(|| stem.strip_suffix("_test"))
        .unwrap_or(&stem);
    normalize_relative(&ctx.source_dir)
        .unwrap_or_default()
        .join(format!("{module}.py"))
}

fn read_optional(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

fn with_newline(code: &str) -> String {
    let mut owned = code.to_string();
    if !owned.ends_with('\n') {
        owned.push('\n');
    }
    owned
}
