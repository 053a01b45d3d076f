//! Session records under the record directory (default `.aitern/explorations/`).
//!
//! A session lives in memory from `begin` to `end`; `end` is the only durable
//! write. A process that dies mid-session leaves no record. A failed write
//! leaves the session active so sealing can be retried.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use jsonschema::validator_for;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::types::{StepType, TestCase};
use crate::error::ExploreError;
use crate::io::atomic::write_atomic;
use crate::io::init::ensure_record_dir_ignored;
use crate::io::snapshot::CodeSnapshot;

const SESSION_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/session.v1.schema.json"
));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSession {
    pub id: String,
    pub branch: String,
    pub base_branch: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub test_snapshot: Vec<TestCase>,
    pub initial_code: CodeSnapshot,
    pub steps: Vec<Step>,
    pub success: bool,
    pub final_code: Option<CodeSnapshot>,
    /// Why the session was sealed without a final snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where a session runs: its isolated branch and the branch it forked from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOrigin {
    pub branch: String,
    pub base_branch: String,
}

#[derive(Debug)]
pub struct ExplorationRecorder {
    record_dir: PathBuf,
    active: Option<ExplorationSession>,
}

impl ExplorationRecorder {
    pub fn new(record_dir: impl Into<PathBuf>) -> Self {
        Self {
            record_dir: record_dir.into(),
            active: None,
        }
    }

    pub fn record_dir(&self) -> &Path {
        &self.record_dir
    }

    pub fn active(&self) -> Option<&ExplorationSession> {
        self.active.as_ref()
    }

    /// Open a session and return its id.
    pub fn begin(
        &mut self,
        origin: SessionOrigin,
        tests: Vec<TestCase>,
        code: CodeSnapshot,
    ) -> Result<String> {
        if let Some(session) = &self.active {
            return Err(ExploreError::SessionActive {
                session_id: session.id.clone(),
            }
            .into());
        }
        let start_time = Utc::now();
        let id = session_id(start_time);
        info!(session_id = %id, branch = %origin.branch, "session started");
        self.active = Some(ExplorationSession {
            id: id.clone(),
            branch: origin.branch,
            base_branch: origin.base_branch,
            start_time,
            end_time: None,
            test_snapshot: tests,
            initial_code: code,
            steps: Vec::new(),
            success: false,
            final_code: None,
            error: None,
        });
        Ok(id)
    }

    /// Append a step to the active session. Without one, logs and drops it.
    pub fn append(&mut self, step_type: StepType, details: Value) {
        let Some(session) = self.active.as_mut() else {
            warn!(step = step_type.as_str(), "no active session, dropping step");
            return;
        };
        let floor = session
            .steps
            .last()
            .map_or(session.start_time, |step| step.timestamp);
        // Wall clocks can step backwards; recorded order must not.
        let timestamp = Utc::now().max(floor);
        debug!(step = step_type.as_str(), "recorded step");
        session.steps.push(Step {
            timestamp,
            step_type,
            details,
        });
    }

    /// Seal the active session and write it to `<record_dir>/<id>.json`.
    pub fn end(&mut self, success: bool, final_code: CodeSnapshot) -> Result<PathBuf> {
        self.seal(success, Some(final_code), None)
    }

    /// Seal the active session without a final snapshot, keeping `error`.
    pub fn abort(&mut self, success: bool, error: String) -> Result<PathBuf> {
        self.seal(success, None, Some(error))
    }

    fn seal(
        &mut self,
        success: bool,
        final_code: Option<CodeSnapshot>,
        error: Option<String>,
    ) -> Result<PathBuf> {
        let mut session = self
            .active
            .clone()
            .ok_or(ExploreError::NoActiveSession)?;
        let floor = session
            .steps
            .last()
            .map_or(session.start_time, |step| step.timestamp);
        session.end_time = Some(Utc::now().max(floor));
        session.success = success;
        session.final_code = final_code;
        session.error = error;

        let path = self.record_path(&session.id);
        let mut buf = serde_json::to_string_pretty(&session).context("serialize session")?;
        buf.push('\n');
        ensure_record_dir_ignored(&self.record_dir)?;
        write_atomic(&path, buf.as_bytes())
            .with_context(|| format!("write session record {}", path.display()))?;
        self.active = None;
        info!(session_id = %session.id, success, path = %path.display(), "session recorded");
        Ok(path)
    }

    /// All valid records, newest start time first. Invalid records are skipped.
    pub fn history(&self) -> Result<Vec<ExplorationSession>> {
        let entries = match fs::read_dir(&self.record_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read {}", self.record_dir.display()));
            }
        };
        let schema = session_schema()?;
        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("read {}", self.record_dir.display()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_session(&path, &schema) {
                Ok(session) => sessions.push(session),
                Err(err) => warn!(path = %path.display(), err = %format!("{err:#}"), "skipping invalid session record"),
            }
        }
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id)));
        Ok(sessions)
    }

    /// Load one record by id.
    pub fn load(&self, id: &str) -> Result<ExplorationSession> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(anyhow!("invalid session id '{id}'"));
        }
        let path = self.record_path(id);
        if !path.is_file() {
            return Err(anyhow!("no session record for '{id}' in {}", self.record_dir.display()));
        }
        read_session(&path, &session_schema()?)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.record_dir.join(format!("{id}.json"))
    }
}

/// Time-ordered id: UTC timestamp to the millisecond plus a random suffix.
fn session_id(at: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("{}-{suffix}", at.format("%Y%m%dT%H%M%S%3fZ"))
}

fn session_schema() -> Result<jsonschema::Validator> {
    let schema: Value = serde_json::from_str(SESSION_SCHEMA).context("parse session schema")?;
    validator_for(&schema).map_err(|err| anyhow!("invalid session schema: {err}"))
}

fn read_session(path: &Path, schema: &jsonschema::Validator) -> Result<ExplorationSession> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let messages: Vec<String> = schema.iter_errors(&value).map(|err| err.to_string()).collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "session schema validation failed: {}",
            messages.join("; ")
        ));
    }
    serde_json::from_value(value).with_context(|| format!("deserialize {}", path.display()))
}
