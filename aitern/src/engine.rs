//! The bounded exploration loop.
//!
//! One engine owns one working tree. A session is opened with
//! [`ExplorationEngine::start_session`] (isolated branch, test snapshot, code
//! snapshot) and driven by [`ExplorationEngine::run_iterations`], which runs
//! test → analyze → search → understand → plan → apply → commit until the
//! suite passes or the iteration budget is spent. Every phase is recorded as a
//! step of the session.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Standard};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::core::classifier::{FailureClassifier, PatternClassifier};
use crate::core::path::to_slash;
use crate::core::planner::{ModificationPlanner, PlanContext, validate_plan};
use crate::core::report::TestRunResult;
use crate::core::summary::StructuralSummary;
use crate::core::types::{
    FailureDetail, ModificationPlan, SearchResult, StepType, TestCase, TestFailure,
};
use crate::error::ExploreError;
use crate::io::applier::ModificationApplier;
use crate::io::branch::BranchCoordinator;
use crate::io::code_index::{CodeIndex, SemanticSearch};
use crate::io::config::AiternConfig;
use crate::io::init::{AiternPaths, ensure_gitignore};
use crate::io::recorder::{ExplorationRecorder, SessionOrigin};
use crate::io::snapshot::CodeSnapshot;
use crate::io::suite::{TestSelector, TestSuiteIndex};
use crate::io::test_runner::TestRunner;

/// Output kept per test run in the `test_execution` step.
const RECORDED_OUTPUT_CHARS: usize = 4_000;

/// Terminal state of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub success: bool,
    pub iterations_run: u32,
    pub session_id: String,
    pub branch: String,
    pub base_branch: String,
    pub record_path: PathBuf,
    /// Code snapshot taken when the session ended.
    pub final_state: CodeSnapshot,
}

struct ActiveSession {
    id: String,
    branch: String,
    base_branch: String,
    cases: Vec<TestCase>,
    index: CodeIndex,
}

/// Search hits for one failing test.
struct FailureSearch {
    queries: Vec<String>,
    results: Vec<SearchResult>,
}

pub struct ExplorationEngine<R, B, P> {
    root: PathBuf,
    config: AiternConfig,
    runner: R,
    branches: B,
    planner: P,
    classifier: Box<dyn FailureClassifier>,
    semantic: Option<Rc<dyn SemanticSearch>>,
    applier: ModificationApplier,
    recorder: ExplorationRecorder,
    active: Option<ActiveSession>,
}

impl<R, B, P> ExplorationEngine<R, B, P>
where
    R: TestRunner,
    B: BranchCoordinator,
    P: ModificationPlanner,
{
    pub fn new(
        root: impl Into<PathBuf>,
        config: AiternConfig,
        runner: R,
        branches: B,
        planner: P,
    ) -> Self {
        let root = root.into();
        let recorder = ExplorationRecorder::new(AiternPaths::new(&root).record_dir(&config));
        Self {
            applier: ModificationApplier::new(&root),
            root,
            config,
            runner,
            branches,
            planner,
            classifier: Box::new(PatternClassifier),
            semantic: None,
            recorder,
            active: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Fallback search used by sessions started after this call.
    pub fn with_semantic_search(mut self, semantic: Box<dyn SemanticSearch>) -> Self {
        self.semantic = Some(Rc::from(semantic));
        self
    }

    pub fn recorder(&self) -> &ExplorationRecorder {
        &self.recorder
    }

    pub fn branches(&self) -> &B {
        &self.branches
    }

    /// Open a session over the tests matching `filters` (all tests when empty).
    #[instrument(skip_all, fields(filters = filters.len()))]
    pub fn start_session(&mut self, filters: &[String]) -> Result<String> {
        if let Some(active) = &self.active {
            return Err(ExploreError::SessionActive {
                session_id: active.id.clone(),
            }
            .into());
        }

        let suite = TestSuiteIndex::discover(&self.root, &self.config.test_dir)?;
        let cases = suite.select(filters);
        if cases.is_empty() {
            return Err(ExploreError::NoTestsFound {
                test_dir: self.config.test_dir.clone(),
            }
            .into());
        }

        let record_prefix = format!("{}/", to_slash(&self.config.record_dir));
        let allowed = [".aitern/", record_prefix.as_str()];
        let dirty = self
            .branches
            .dirty_paths(&allowed)
            .ok_or_else(|| anyhow!("could not read working tree status"))?;
        if !dirty.is_empty() {
            return Err(ExploreError::DirtyWorktree { paths: dirty }.into());
        }

        let base_branch = self
            .branches
            .current_branch()
            .ok_or_else(|| anyhow!("could not determine the current branch (detached HEAD?)"))?;
        let branch = branch_name(&self.config.branch_prefix, Utc::now());
        if !self.branches.create_isolated_branch(&branch) {
            return Err(ExploreError::BranchCreation { branch }.into());
        }

        match self.open_session(&branch, &base_branch, cases) {
            Ok(id) => Ok(id),
            Err(err) => {
                if !self.branches.checkout(&base_branch) {
                    warn!(%branch, %base_branch, "could not return to base branch");
                }
                Err(err)
            }
        }
    }

    /// Bootstrap the freshly created `branch` and begin recording.
    fn open_session(
        &mut self,
        branch: &str,
        base_branch: &str,
        cases: Vec<TestCase>,
    ) -> Result<String> {
        if ensure_gitignore(&AiternPaths::new(&self.root))?
            && self
                .branches
                .commit_all("aitern: ignore exploration records")
                .is_none()
        {
            warn!(%branch, "bootstrap commit failed");
        }

        let mut index = CodeIndex::scan(&self.root, self.config.search.clone())?;
        if let Some(semantic) = &self.semantic {
            index = index.with_semantic(Rc::clone(semantic));
        }
        let snapshot = CodeSnapshot::take(&self.root, &self.config.search.extensions)
            .context("snapshot initial code")?;
        let id = self.recorder.begin(
            SessionOrigin {
                branch: branch.to_string(),
                base_branch: base_branch.to_string(),
            },
            cases.clone(),
            snapshot,
        )?;
        info!(session_id = %id, %branch, %base_branch, tests = cases.len(), "exploration started");
        self.active = Some(ActiveSession {
            id: id.clone(),
            branch: branch.to_string(),
            base_branch: base_branch.to_string(),
            cases,
            index,
        });
        Ok(id)
    }

    /// Run up to `max_iterations` iterations, then seal the session.
    ///
    /// When the final snapshot cannot be taken the session is sealed with the
    /// error instead. When the record cannot be written the session stays
    /// open and a later call resumes it.
    #[instrument(skip_all, fields(max_iterations = max_iterations))]
    pub fn run_iterations(&mut self, max_iterations: u32) -> Result<SessionResult> {
        let mut session = self.active.take().ok_or(ExploreError::NoActiveSession)?;
        let selector = TestSelector::for_cases(&session.cases);

        let mut success = false;
        let mut iterations_run = 0;
        for iteration in 1..=max_iterations {
            iterations_run = iteration;
            info!(iteration, "iteration started");
            if self.iterate(&mut session, &selector, iteration) {
                success = true;
                break;
            }
        }

        let final_state = match CodeSnapshot::take(&self.root, &self.config.search.extensions) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let err = err.context("snapshot final code");
                warn!(
                    session_id = %session.id,
                    err = %format!("{err:#}"),
                    "sealing session without final code"
                );
                if let Err(record_err) = self.recorder.abort(success, format!("{err:#}")) {
                    warn!(err = %format!("{record_err:#}"), "could not record aborted session");
                    self.active = Some(session);
                }
                return Err(err);
            }
        };
        let record_path = match self.recorder.end(success, final_state.clone()) {
            Ok(path) => path,
            Err(err) => {
                self.active = Some(session);
                return Err(err);
            }
        };

        if success
            && self.config.git.push_on_success
            && !self.branches.push(&self.config.git.remote, &session.branch)
        {
            warn!(branch = %session.branch, remote = %self.config.git.remote, "push after success failed");
        }
        info!(session_id = %session.id, success, iterations_run, "exploration finished");

        Ok(SessionResult {
            success,
            iterations_run,
            session_id: session.id,
            branch: session.branch,
            base_branch: session.base_branch,
            record_path,
            final_state,
        })
    }

    /// One pass of the loop. Returns true when the suite passed.
    fn iterate(
        &mut self,
        session: &mut ActiveSession,
        selector: &TestSelector,
        iteration: u32,
    ) -> bool {
        let run = match self.runner.run(selector) {
            Ok(run) => {
                self.recorder
                    .append(StepType::TestExecution, run_details(iteration, &run));
                run
            }
            Err(err) => {
                warn!(iteration, err = %format!("{err:#}"), "test run failed");
                self.recorder.append(
                    StepType::TestExecution,
                    json!({ "iteration": iteration, "error": format!("{err:#}") }),
                );
                return false;
            }
        };
        if run.all_passed() {
            info!(iteration, passed = run.passed, "all selected tests passed");
            return true;
        }

        let failures: Vec<TestFailure> = run
            .failures
            .iter()
            .map(|report| {
                let classification = self.classifier.classify(&report.diagnostic);
                TestFailure {
                    test: report.test.clone(),
                    kind: classification.kind,
                    diagnostic: report.diagnostic.clone(),
                    detail: classification.detail,
                }
            })
            .collect();
        self.recorder.append(
            StepType::TestAnalysis,
            json!({ "iteration": iteration, "failures": failures }),
        );

        if let Err(err) = session.index.refresh() {
            warn!(err = %format!("{err:#}"), "code index refresh failed");
        }
        let searches: Vec<FailureSearch> = failures
            .iter()
            .map(|failure| search_for(&session.index, failure))
            .collect();
        let search_details: Vec<Value> = failures
            .iter()
            .zip(&searches)
            .map(|(failure, search)| {
                json!({
                    "test": failure.test.node_id,
                    "queries": search.queries,
                    "results": search.results.iter().map(|r| json!({
                        "path": to_slash(&r.path),
                        "relevance": r.relevance,
                        "reason": r.reason,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        self.recorder.append(
            StepType::CodeSearch,
            json!({ "iteration": iteration, "searches": search_details }),
        );

        let summaries = summarize_found(&session.index, &searches);
        self.recorder.append(
            StepType::CodeUnderstanding,
            json!({ "iteration": iteration, "summaries": summaries }),
        );

        let mut plans: Vec<ModificationPlan> = Vec::new();
        let mut plan_errors: Vec<Value> = Vec::new();
        for (failure, search) in failures.iter().zip(searches) {
            let ctx = PlanContext {
                source_dir: self.config.source_dir.clone(),
                source_files: session.index.file_set(),
                search_results: search.results,
                summaries: summaries.clone(),
            };
            match self.plan_one(failure, &ctx) {
                Ok(plan) => plans.push(plan),
                Err(err) => {
                    warn!(test = %failure.test.node_id, err = %format!("{err:#}"), "planning failed");
                    plan_errors.push(json!({
                        "test": failure.test.node_id,
                        "error": format!("{err:#}"),
                    }));
                }
            }
        }
        self.recorder.append(
            StepType::ModificationPlan,
            json!({ "iteration": iteration, "plans": plans, "errors": plan_errors }),
        );

        let applied: Vec<Value> = plans
            .iter()
            .filter(|plan| !plan.is_empty())
            .map(|plan| {
                let report = self.applier.apply(plan);
                json!({
                    "test": plan.failure.test.node_id,
                    "succeeded": report.succeeded(),
                    "report": report,
                })
            })
            .collect();
        self.recorder.append(
            StepType::ModificationApplied,
            json!({ "iteration": iteration, "results": applied }),
        );

        let message = format!("aitern: exploration iteration {iteration}");
        let commit = self.branches.commit_all(&message);
        if commit.is_none() {
            warn!(iteration, "iteration commit failed");
        }
        self.recorder.append(
            StepType::CodeCommit,
            json!({ "iteration": iteration, "message": message, "commit": commit }),
        );
        false
    }

    fn plan_one(&self, failure: &TestFailure, ctx: &PlanContext) -> Result<ModificationPlan> {
        let plan = self.planner.plan(failure, ctx)?;
        validate_plan(&plan, &self.root)?;
        Ok(plan)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// `<prefix>exploration-<UTC timestamp>-<8 hex>`.
fn branch_name(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().sample(Standard);
    format!("{prefix}exploration-{}-{suffix:08x}", at.format("%Y%m%d-%H%M%S"))
}

fn run_details(iteration: u32, run: &TestRunResult) -> Value {
    let output = run.output.as_str();
    let skip = output.chars().count().saturating_sub(RECORDED_OUTPUT_CHARS);
    let tail: String = output.chars().skip(skip).collect();
    json!({
        "iteration": iteration,
        "exit_code": run.exit_code,
        "total": run.total,
        "passed": run.passed,
        "failed": run.failed,
        "skipped": run.skipped,
        "errors": run.errors,
        "failures": run.failures.iter().map(|f| json!({
            "test": f.test.node_id,
            "message": f.message,
            "is_error": f.is_error,
        })).collect::<Vec<_>>(),
        "output_tail": tail,
    })
}

/// Queries seeded by the test name, the test file stem and any symbols the
/// classifier extracted, de-duplicated in that order.
fn search_queries(failure: &TestFailure) -> Vec<String> {
    let mut queries = vec![failure.test.name.clone()];
    queries.extend(failure.test.file_stem());
    match &failure.detail {
        FailureDetail::MissingModule { module } => queries.push(module.clone()),
        FailureDetail::MissingSymbol { target, symbol, .. } => {
            queries.push(symbol.clone());
            queries.push(target.clone());
        }
        FailureDetail::Name { name } => queries.push(name.clone()),
        _ => {}
    }
    let mut seen = BTreeSet::new();
    queries.retain(|query| !query.is_empty() && seen.insert(query.clone()));
    queries
}

fn search_for(index: &CodeIndex, failure: &TestFailure) -> FailureSearch {
    let queries = search_queries(failure);
    let mut results: Vec<SearchResult> = Vec::new();
    for query in &queries {
        for result in index.search(query) {
            if !results.iter().any(|existing| existing.path == result.path) {
                results.push(result);
            }
        }
    }
    // Stable: earlier queries win ties.
    results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    FailureSearch { queries, results }
}

fn summarize_found(index: &CodeIndex, searches: &[FailureSearch]) -> Vec<StructuralSummary> {
    let paths: BTreeSet<&PathBuf> = searches
        .iter()
        .flat_map(|search| search.results.iter().map(|result| &result.path))
        .collect();
    paths
        .into_iter()
        .filter_map(|path| match index.summarize(path) {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!(path = %path.display(), err = %format!("{err:#}"), "summary failed");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::planner::KindPlanner;
    use crate::core::types::TestRef;
    use crate::test_support::{FakeBranchCoordinator, ScriptedRunner, failing_run, passing_run};
    use std::cell::Cell;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("tests")).expect("mkdir");
        fs::write(
            temp.path().join("tests/test_calc.py"),
            "from calc import add\n\n\ndef test_add():\n    assert add(2, 3) == 5\n",
        )
        .expect("write");
        temp
    }

    #[test]
    fn branch_name_has_prefix_timestamp_and_hex_suffix() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T12:30:45Z")
            .expect("time")
            .with_timezone(&Utc);
        let name = branch_name("aitern/", at);
        let suffix = name
            .strip_prefix("aitern/exploration-20260301-123045-")
            .expect("prefix");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn search_queries_cover_name_stem_and_symbols() {
        let failure = TestFailure {
            test: TestRef::from_node_id("tests/test_calc.py::test_add"),
            kind: crate::core::types::FailureKind::MissingSymbol,
            diagnostic: String::new(),
            detail: FailureDetail::MissingSymbol {
                target: "calc".to_string(),
                symbol: "add".to_string(),
                target_is_type: false,
            },
        };
        assert_eq!(
            search_queries(&failure),
            vec!["test_add", "test_calc", "add", "calc"]
        );
    }

    #[test]
    fn start_session_rejects_missing_tests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::new(Vec::new());
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );
        let err = engine.start_session(&[]).expect_err("no tests");
        assert!(matches!(
            err.downcast_ref::<ExploreError>(),
            Some(ExploreError::NoTestsFound { .. })
        ));
        assert_eq!(branches.branches.borrow().len(), 1);
    }

    #[test]
    fn start_session_rejects_dirty_tree_but_ignores_records() {
        let temp = project();
        let branches = FakeBranchCoordinator::on_branch("main");
        branches
            .dirty
            .borrow_mut()
            .push(".aitern/explorations/old.json".to_string());
        let runner = ScriptedRunner::new(Vec::new());
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );
        engine.start_session(&[]).expect("records are not dirt");

        let branches = FakeBranchCoordinator::on_branch("main");
        branches.dirty.borrow_mut().push("calc.py".to_string());
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );
        let err = engine.start_session(&[]).expect_err("dirty");
        assert!(matches!(
            err.downcast_ref::<ExploreError>(),
            Some(ExploreError::DirtyWorktree { paths }) if paths == &vec!["calc.py".to_string()]
        ));
    }

    #[test]
    fn second_start_and_run_without_session_are_rejected() {
        let temp = project();
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::new(Vec::new());
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );
        let err = engine.run_iterations(1).expect_err("no session");
        assert!(matches!(
            err.downcast_ref::<ExploreError>(),
            Some(ExploreError::NoActiveSession)
        ));

        let id = engine.start_session(&[]).expect("start");
        let err = engine.start_session(&[]).expect_err("active");
        assert!(matches!(
            err.downcast_ref::<ExploreError>(),
            Some(ExploreError::SessionActive { session_id }) if session_id == &id
        ));
    }

    #[test]
    fn branch_creation_failure_aborts_start() {
        let temp = project();
        let branches = FakeBranchCoordinator {
            fail_branch_creation: true,
            ..FakeBranchCoordinator::on_branch("main")
        };
        let runner = ScriptedRunner::new(Vec::new());
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );
        let err = engine.start_session(&[]).expect_err("branch");
        assert!(matches!(
            err.downcast_ref::<ExploreError>(),
            Some(ExploreError::BranchCreation { .. })
        ));
        assert!(engine.recorder().active().is_none());
    }

    #[test]
    fn runner_errors_are_recorded_and_retried() {
        let temp = project();
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::new(vec![Err(anyhow!("pytest crashed")), Ok(passing_run(1))]);
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );
        engine.start_session(&[]).expect("start");
        let result = engine.run_iterations(5).expect("run");

        assert!(result.success);
        assert_eq!(result.iterations_run, 2);
        let session = engine.recorder().load(&result.session_id).expect("load");
        assert_eq!(session.steps.len(), 2);
        assert!(session.steps[0].details["error"]
            .as_str()
            .expect("error")
            .contains("pytest crashed"));
    }

    #[test]
    fn failing_iteration_records_every_phase_and_commits() {
        let temp = project();
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::new(vec![
            Ok(failing_run(
                "tests/test_calc.py::test_add",
                "E   ModuleNotFoundError: No module named 'calc'",
            )),
            Ok(passing_run(1)),
        ]);
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );
        engine.start_session(&[]).expect("start");
        let result = engine.run_iterations(3).expect("run");

        assert!(result.success);
        assert!(temp.path().join("calc.py").is_file());
        assert!(result.final_state.files.contains_key("calc.py"));
        let session = engine.recorder().load(&result.session_id).expect("load");
        let kinds: Vec<StepType> = session.steps.iter().map(|s| s.step_type).collect();
        assert_eq!(
            kinds,
            vec![
                StepType::TestExecution,
                StepType::TestAnalysis,
                StepType::CodeSearch,
                StepType::CodeUnderstanding,
                StepType::ModificationPlan,
                StepType::ModificationApplied,
                StepType::CodeCommit,
                StepType::TestExecution,
            ]
        );
        assert_eq!(
            session.steps[1].details["failures"][0]["kind"],
            "missing_module"
        );
        assert!(branches
            .commit_messages()
            .contains(&"aitern: exploration iteration 1".to_string()));
    }

    #[test]
    fn push_happens_only_after_success_when_enabled() {
        let temp = project();
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::new(vec![Ok(passing_run(1))]);
        let mut config = AiternConfig::default();
        config.git.push_on_success = true;
        let mut engine =
            ExplorationEngine::new(temp.path(), config, &runner, &branches, KindPlanner);
        engine.start_session(&[]).expect("start");
        let result = engine.run_iterations(1).expect("run");

        assert_eq!(
            branches.pushes.borrow().clone(),
            vec![("origin".to_string(), result.branch.clone())]
        );
    }

    #[test]
    fn failed_bootstrap_returns_to_the_base_branch() {
        let temp = project();
        fs::write(temp.path().join(".aitern"), "not a directory").expect("write");
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::new(Vec::new());
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );

        assert!(engine.start_session(&[]).is_err());
        assert_eq!(branches.branches.borrow().len(), 2);
        assert_eq!(branches.current_branch().as_deref(), Some("main"));
        assert!(engine.recorder().active().is_none());
    }

    #[test]
    fn unwritable_record_keeps_the_session_open_until_a_retry() {
        let temp = project();
        let records = temp.path().join("records");
        fs::write(&records, "not a directory").expect("write");
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::repeating(passing_run(1));
        let mut config = AiternConfig::default();
        config.record_dir = PathBuf::from("records");
        let mut engine =
            ExplorationEngine::new(temp.path(), config, &runner, &branches, KindPlanner);
        let id = engine.start_session(&[]).expect("start");

        assert!(engine.run_iterations(1).is_err());
        assert_eq!(engine.recorder().active().map(|s| s.id.as_str()), Some(id.as_str()));
        let err = engine.start_session(&[]).expect_err("still active");
        assert!(matches!(
            err.downcast_ref::<ExploreError>(),
            Some(ExploreError::SessionActive { session_id }) if session_id == &id
        ));

        fs::remove_file(&records).expect("remove");
        let result = engine.run_iterations(1).expect("retry");
        assert!(result.success);
        assert_eq!(result.session_id, id);
        let session = engine.recorder().load(&id).expect("load");
        assert_eq!(session.steps.len(), 2);
    }

    #[test]
    fn failed_final_snapshot_still_seals_the_session() {
        let temp = project();
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::repeating(passing_run(1));
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        );
        let id = engine.start_session(&[]).expect("start");
        fs::remove_dir_all(temp.path()).expect("remove project");

        let err = engine.run_iterations(1).expect_err("snapshot");
        assert!(format!("{err:#}").contains("snapshot final code"));
        assert!(engine.recorder().active().is_none());
        let session = engine.recorder().load(&id).expect("load");
        assert!(session.final_code.is_none());
        assert!(session
            .error
            .as_deref()
            .is_some_and(|error| error.contains("snapshot final code")));
        let err = engine.run_iterations(1).expect_err("sealed");
        assert!(matches!(
            err.downcast_ref::<ExploreError>(),
            Some(ExploreError::NoActiveSession)
        ));
    }

    struct CountingSearch(Rc<Cell<usize>>);

    impl SemanticSearch for CountingSearch {
        fn search(&self, _query: &str, _files: &[PathBuf]) -> Result<Vec<SearchResult>> {
            self.0.set(self.0.get() + 1);
            Ok(Vec::new())
        }
    }

    #[test]
    fn semantic_search_serves_every_session() {
        let temp = project();
        let branches = FakeBranchCoordinator::on_branch("main");
        let runner = ScriptedRunner::repeating(failing_run(
            "tests/test_calc.py::test_add",
            "E   assert 4 == 5",
        ));
        let calls = Rc::new(Cell::new(0));
        let mut engine = ExplorationEngine::new(
            temp.path(),
            AiternConfig::default(),
            &runner,
            &branches,
            KindPlanner,
        )
        .with_semantic_search(Box::new(CountingSearch(Rc::clone(&calls))));

        engine.start_session(&[]).expect("first start");
        engine.run_iterations(1).expect("first run");
        let after_first = calls.get();
        assert!(after_first > 0);

        engine.start_session(&[]).expect("second start");
        engine.run_iterations(1).expect("second run");
        assert!(calls.get() > after_first);
    }
}
