//! Workflow graph: stage identifiers, the conditional routing table, and
//! the engine that walks a run from orchestration to its report.
//!
//! Routing is a pure function of (stage, state) so every branch can be
//! tested without running a stage. The engine adds two liveness guards on
//! top: an external cancel flag checked between stages, and a transition
//! budget that turns a routing bug into an error instead of a spin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use gw_core::config::Config;
use gw_core::types::{Language, Mode};
use gw_reason::provider::ReasoningProvider;

use crate::approval::{ApprovalGate, ApprovalPrompt};
use crate::handlers::{GenericHandler, JavaHandler, NodeHandler, PythonHandler, SharedRunner};
use crate::queue::{LanguageHandler, LanguageQueueExecutor};
use crate::runner::StepRunner;
use crate::safety::{ActionClassifier, SafetyError};
use crate::shell::CommandSpawner;
use crate::stages::{
    AnalyzeStage, OrchestrateStage, PlanStage, ReportStage, ScanStage, VerifyStage,
};
use crate::state::RunState;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Safety(#[from] SafetyError),
    #[error("workflow routing did not terminate after {transitions} transitions")]
    RoutingLoop { transitions: usize },
}

// ---------------------------------------------------------------------------
// Stages and routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    Orchestrate,
    Scan,
    Analyze,
    Plan,
    Execute,
    Verify,
    Report,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Orchestrate => "orchestrate",
            StageId::Scan => "scan",
            StageId::Analyze => "analyze",
            StageId::Plan => "plan",
            StageId::Execute => "execute",
            StageId::Verify => "verify",
            StageId::Report => "report",
        }
    }
}

/// The stage that follows `stage`, or `None` when the run is over.
///
/// Every path through the table ends at `Report`, and `Report` is the only
/// stage that ends the run: whatever went wrong earlier, the user gets a
/// report saying so.
pub fn route_after(stage: StageId, state: &RunState) -> Option<StageId> {
    // a cancelled run skips ahead to its report
    if state.is_cancelled() && stage != StageId::Report {
        return Some(StageId::Report);
    }

    match stage {
        StageId::Orchestrate => Some(StageId::Scan),
        StageId::Scan => {
            if state.detected_languages.is_empty() {
                Some(StageId::Report)
            } else {
                Some(StageId::Analyze)
            }
        }
        StageId::Analyze => Some(StageId::Plan),
        StageId::Plan => match &state.plan {
            Some(plan) if !plan.is_empty() => Some(StageId::Execute),
            _ => Some(StageId::Report),
        },
        StageId::Execute => Some(route_after_execute(state)),
        StageId::Verify => Some(StageId::Report),
        StageId::Report => None,
    }
}

fn route_after_execute(state: &RunState) -> StageId {
    if state.workflow_should_end {
        return StageId::Report;
    }
    if critical_step_failed(state) {
        return StageId::Report;
    }
    // the execute node feeds itself until the language queue drains
    if state.has_more_languages {
        return StageId::Execute;
    }
    if state.execution_results.is_empty() {
        return StageId::Report;
    }
    if state.preferences.skip_verification || state.mode == Mode::DryRun {
        return StageId::Report;
    }
    StageId::Verify
}

/// A failed step the plan marked critical ends execution early; the
/// remaining queue cannot produce a working environment on top of it.
fn critical_step_failed(state: &RunState) -> bool {
    let Some(plan) = &state.plan else {
        return false;
    };
    plan.critical_steps
        .iter()
        .any(|id| state.failed_steps.contains(id))
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Owns the stages and drives one run at a time through the routing table.
pub struct WorkflowEngine {
    orchestrate: OrchestrateStage,
    scan: ScanStage,
    analyze: AnalyzeStage,
    plan: PlanStage,
    executor: LanguageQueueExecutor,
    verify: VerifyStage,
    report: ReportStage,
    cancel: Arc<AtomicBool>,
}

impl WorkflowEngine {
    pub fn new(
        config: Config,
        provider: Arc<dyn ReasoningProvider>,
        prompt: Arc<dyn ApprovalPrompt>,
        spawner: Arc<dyn CommandSpawner>,
        mode: Mode,
    ) -> Result<Self, EngineError> {
        let gate = ApprovalGate::new(config.safety.clone(), prompt.clone());
        let runner = StepRunner::new(
            spawner.clone(),
            ActionClassifier::new(&config.safety)?,
            gate,
            Some(provider.clone()),
            config.execution.clone(),
            mode,
        );
        let runner: SharedRunner = Arc::new(Mutex::new(runner));

        let executor = LanguageQueueExecutor::with_handlers([
            Arc::new(NodeHandler::new(runner.clone())) as Arc<dyn LanguageHandler>,
            Arc::new(PythonHandler::pip(runner.clone())),
            Arc::new(PythonHandler::poetry(runner.clone())),
            Arc::new(JavaHandler::maven(runner.clone())),
            Arc::new(JavaHandler::gradle(runner.clone())),
            Arc::new(GenericHandler::new(Language::Ruby, runner.clone())),
            Arc::new(GenericHandler::new(Language::Golang, runner.clone())),
            Arc::new(GenericHandler::new(Language::Rust, runner.clone())),
            Arc::new(GenericHandler::new(Language::Docker, runner.clone())),
            Arc::new(GenericHandler::new(Language::Make, runner)),
        ]);

        Ok(Self {
            orchestrate: OrchestrateStage::new(provider.clone()),
            scan: ScanStage::new(),
            analyze: AnalyzeStage::new(provider.clone()),
            plan: PlanStage::new(
                provider,
                ActionClassifier::new(&config.safety)?,
                prompt,
                &config.safety,
            ),
            executor,
            verify: VerifyStage::new(spawner),
            report: ReportStage::new(config.report.clone()),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag a signal handler can set to stop the run at the next stage
    /// boundary. The stage in flight finishes; the report still renders.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Drive one run from a fresh state to its report.
    pub async fn run(&self, mut state: RunState) -> Result<RunState, EngineError> {
        let mut stage = StageId::Orchestrate;
        let mut transitions = 0usize;

        loop {
            tracing::debug!(stage = stage.as_str(), "entering stage");
            state = self.enter(stage, state).await;

            if self.cancel.load(Ordering::Relaxed) && !state.is_cancelled() {
                state.cancel("interrupted");
            }

            let Some(next) = route_after(stage, &state) else {
                return Ok(state);
            };

            transitions += 1;
            // fixed stages plus one execute pass per queued language, with slack
            let budget = 2 * state.execution_queue.len() + 16;
            if transitions > budget {
                return Err(EngineError::RoutingLoop { transitions });
            }
            stage = next;
        }
    }

    async fn enter(&self, stage: StageId, state: RunState) -> RunState {
        match stage {
            StageId::Orchestrate => self.orchestrate.run(state).await,
            StageId::Scan => self.scan.run(state).await,
            StageId::Analyze => self.analyze.run(state).await,
            StageId::Plan => self.plan.run(state).await,
            StageId::Execute => self.executor.execute_next(state).await,
            StageId::Verify => self.verify.run(state).await,
            StageId::Report => self.report.run(state).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::QueuedPrompt;
    use crate::shell::MockSpawner;
    use gw_core::types::{InstallPlan, Preferences, Step, StepResult};
    use gw_reason::provider::{ScriptedProvider, StubProvider};
    use serde_json::json;

    fn state_with(languages: &[Language]) -> RunState {
        let mut state = RunState::new("/tmp/demo", Mode::Auto, Preferences::default());
        state.detected_languages = languages.to_vec();
        state.execution_queue = languages.to_vec();
        state.update_queue_flags();
        state
    }

    fn planned_state(languages: &[Language]) -> RunState {
        let mut state = state_with(languages);
        let steps = languages
            .iter()
            .map(|l| Step::new(format!("{l}-setup"), "Setup", "echo setup").with_language(*l))
            .collect();
        state.plan = Some(InstallPlan {
            steps,
            ..InstallPlan::default()
        });
        state
    }

    // -- routing table ------------------------------------------------------

    #[test]
    fn orchestrate_always_scans() {
        let state = state_with(&[]);
        assert_eq!(route_after(StageId::Orchestrate, &state), Some(StageId::Scan));
    }

    #[test]
    fn empty_scan_skips_to_the_report() {
        let state = state_with(&[]);
        assert_eq!(route_after(StageId::Scan, &state), Some(StageId::Report));

        let state = state_with(&[Language::NodeJs]);
        assert_eq!(route_after(StageId::Scan, &state), Some(StageId::Analyze));
    }

    #[test]
    fn planless_runs_never_execute() {
        let state = state_with(&[Language::NodeJs]);
        assert_eq!(route_after(StageId::Plan, &state), Some(StageId::Report));

        let mut state = state_with(&[Language::NodeJs]);
        state.plan = Some(InstallPlan::default());
        assert_eq!(route_after(StageId::Plan, &state), Some(StageId::Report));

        let state = planned_state(&[Language::NodeJs]);
        assert_eq!(route_after(StageId::Plan, &state), Some(StageId::Execute));
    }

    #[test]
    fn execute_feeds_itself_until_the_queue_drains() {
        let mut state = planned_state(&[Language::NodeJs, Language::Golang]);
        state.mark_language_completed(Language::NodeJs);
        state.execution_results.push(StepResult::success("nodejs-setup", ""));
        state.update_queue_flags();
        assert!(state.has_more_languages);
        assert_eq!(route_after(StageId::Execute, &state), Some(StageId::Execute));

        state.mark_language_completed(Language::Golang);
        state.update_queue_flags();
        assert_eq!(route_after(StageId::Execute, &state), Some(StageId::Verify));
    }

    #[test]
    fn critical_plan_failure_ends_execution_early() {
        let mut state = planned_state(&[Language::NodeJs, Language::Golang]);
        state.plan.as_mut().unwrap().critical_steps = vec!["nodejs-setup".to_string()];
        state.mark_language_failed(Language::NodeJs);
        state.record_step_result(StepResult::failed("nodejs-setup", "exit code 1"));
        state.update_queue_flags();
        assert!(state.has_more_languages);

        assert_eq!(route_after(StageId::Execute, &state), Some(StageId::Report));
    }

    #[test]
    fn blocked_workflow_reports_immediately() {
        let mut state = planned_state(&[Language::JavaMaven, Language::JavaGradle]);
        state.workflow_should_end = true;
        assert_eq!(route_after(StageId::Execute, &state), Some(StageId::Report));
    }

    #[test]
    fn execution_without_results_skips_verification() {
        let mut state = planned_state(&[Language::NodeJs]);
        state.mark_language_failed(Language::NodeJs);
        state.update_queue_flags();
        assert!(state.execution_results.is_empty());

        assert_eq!(route_after(StageId::Execute, &state), Some(StageId::Report));
    }

    #[test]
    fn verification_can_be_skipped_by_preference_or_dry_run() {
        let mut state = planned_state(&[Language::NodeJs]);
        state.mark_language_completed(Language::NodeJs);
        state.execution_results.push(StepResult::success("nodejs-setup", ""));
        state.update_queue_flags();
        state.preferences.skip_verification = true;
        assert_eq!(route_after(StageId::Execute, &state), Some(StageId::Report));

        state.preferences.skip_verification = false;
        state.mode = Mode::DryRun;
        assert_eq!(route_after(StageId::Execute, &state), Some(StageId::Report));

        state.mode = Mode::Auto;
        assert_eq!(route_after(StageId::Execute, &state), Some(StageId::Verify));
    }

    #[test]
    fn verify_always_reports_and_report_ends() {
        let state = state_with(&[Language::NodeJs]);
        assert_eq!(route_after(StageId::Verify, &state), Some(StageId::Report));
        assert_eq!(route_after(StageId::Report, &state), None);
    }

    #[test]
    fn cancellation_reroutes_everything_to_the_report() {
        let mut state = planned_state(&[Language::NodeJs]);
        state.cancel("test");
        for stage in [
            StageId::Orchestrate,
            StageId::Scan,
            StageId::Analyze,
            StageId::Plan,
            StageId::Execute,
            StageId::Verify,
        ] {
            assert_eq!(route_after(stage, &state), Some(StageId::Report));
        }
        assert_eq!(route_after(StageId::Report, &state), None);
    }

    // -- engine -------------------------------------------------------------

    fn engine_config(out: &std::path::Path, safety_enabled: bool) -> Config {
        let mut config = Config::default();
        config.safety.enabled = safety_enabled;
        config.report.output_dir = out.to_string_lossy().into_owned();
        config
    }

    #[tokio::test]
    async fn empty_project_runs_scan_to_report() {
        let project = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let engine = WorkflowEngine::new(
            engine_config(out.path(), true),
            Arc::new(StubProvider::new("test")),
            Arc::new(QueuedPrompt::default()),
            Arc::new(MockSpawner::new()),
            Mode::Auto,
        )
        .unwrap();

        let state = RunState::new(project.path(), Mode::Auto, Preferences::default());
        let state = engine.run(state).await.unwrap();

        assert!(state.detected_languages.is_empty());
        assert!(state.finished_at.is_some());
        // the stub provider errors on every consult; no analyzer or planner
        // error means those stages were never entered
        assert!(state.errors.is_empty());
        assert!(state.plan.is_none());
        let report = state.report.as_ref().unwrap();
        assert!(report.contains("No supported configuration files were found"));
        assert!(state.report_path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn scripted_run_installs_verifies_and_reports() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("go.mod"), "module demo\n\ngo 1.22\n").unwrap();
        let out = tempfile::tempdir().unwrap();

        let provider = Arc::new(ScriptedProvider::new([
            json!({"complexity": "moderate", "recommended_approach": "standard run"}).to_string(),
            json!({
                "compatibility_issues": [],
                "installation_order": ["golang"],
                "optimizations": [],
                "security_concerns": []
            })
            .to_string(),
            json!({
                "steps": [{
                    "id": "go-mod",
                    "phase": "project",
                    "name": "Download modules",
                    "command": "go mod download",
                    "language": "golang"
                }],
                "estimated_secs": 30
            })
            .to_string(),
        ]));
        let spawner = Arc::new(MockSpawner::with([
            MockSpawner::ok("go mod download", ""),
            MockSpawner::ok("go version", "go version go1.22.1 linux/amd64"),
        ]));
        let engine = WorkflowEngine::new(
            engine_config(out.path(), false),
            provider,
            Arc::new(QueuedPrompt::default()),
            spawner.clone(),
            Mode::Auto,
        )
        .unwrap();

        let state = RunState::new(project.path(), Mode::Auto, Preferences::default());
        let state = engine.run(state).await.unwrap();

        assert_eq!(state.detected_languages, vec![Language::Golang]);
        assert_eq!(state.completed_languages, vec![Language::Golang]);
        assert_eq!(state.completed_steps, vec!["go-mod".to_string()]);
        assert_eq!(state.health_score, Some(100));
        let commands = spawner.commands();
        assert!(commands.contains(&"go mod download".to_string()));
        assert!(commands.contains(&"go version".to_string()));
        let report = state.report.as_ref().unwrap();
        assert!(report.contains("Status: complete"));
        assert!(report.contains("- golang: success"));
    }

    #[tokio::test]
    async fn dead_reasoning_backend_still_produces_a_report() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("package.json"), "{}").unwrap();
        let out = tempfile::tempdir().unwrap();

        let spawner = Arc::new(MockSpawner::new());
        let engine = WorkflowEngine::new(
            engine_config(out.path(), true),
            Arc::new(StubProvider::new("test")),
            Arc::new(QueuedPrompt::default()),
            spawner.clone(),
            Mode::Auto,
        )
        .unwrap();

        let state = RunState::new(project.path(), Mode::Auto, Preferences::default());
        let state = engine.run(state).await.unwrap();

        // analysis and planning both degrade; nothing executes
        assert!(state.plan.is_none());
        assert!(spawner.commands().is_empty());
        assert!(state.errors.all().iter().any(|e| e.source == "planner"));
        assert!(state.report.as_ref().unwrap().contains("Status: incomplete"));
    }

    #[tokio::test]
    async fn cancel_flag_stops_the_run_at_the_next_boundary() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("go.mod"), "module demo\n").unwrap();
        let out = tempfile::tempdir().unwrap();

        let engine = WorkflowEngine::new(
            engine_config(out.path(), true),
            Arc::new(StubProvider::new("test")),
            Arc::new(QueuedPrompt::default()),
            Arc::new(MockSpawner::new()),
            Mode::Auto,
        )
        .unwrap();
        engine.cancel_handle().store(true, Ordering::Relaxed);

        let state = RunState::new(project.path(), Mode::Auto, Preferences::default());
        let state = engine.run(state).await.unwrap();

        assert!(state.user_cancelled);
        // cancelled right after orchestration: the scan never ran
        assert!(state.detected_languages.is_empty());
        assert!(state.report.as_ref().unwrap().contains("Status: cancelled"));
    }
}
