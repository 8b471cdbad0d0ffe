use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;

use gw_core::config::ExecutionConfig;
use gw_core::error::SetupError;
use gw_core::types::{ExecutionRecord, Mode, Step, StepResult, StepStatus};
use gw_reason::provider::{generate_structured, ReasoningProvider};

use crate::approval::{ApprovalGate, GateError};
use crate::safety::{ActionClassifier, RiskTier};
use crate::shell::{CommandSpawner, ShellRequest};
use crate::state::RunState;

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Runs plan steps one at a time: safety gate, spawn, and a single recovery
/// consult on failure. Never returns an error for a step; every failure mode
/// lands in the step's `StepResult`.
pub struct StepRunner {
    spawner: Arc<dyn CommandSpawner>,
    classifier: ActionClassifier,
    gate: ApprovalGate,
    provider: Option<Arc<dyn ReasoningProvider>>,
    config: ExecutionConfig,
    mode: Mode,
    log: Vec<ExecutionRecord>,
}

/// What the gate decided about one step.
enum GateVerdict {
    Run(Step),
    Skip(String),
}

impl StepRunner {
    pub fn new(
        spawner: Arc<dyn CommandSpawner>,
        classifier: ActionClassifier,
        gate: ApprovalGate,
        provider: Option<Arc<dyn ReasoningProvider>>,
        config: ExecutionConfig,
        mode: Mode,
    ) -> Self {
        Self {
            spawner,
            classifier,
            gate,
            provider,
            config,
            mode,
            log: Vec::new(),
        }
    }

    /// Audit records not yet moved into a run state by `run_plan`.
    pub fn execution_log(&self) -> &[ExecutionRecord] {
        &self.log
    }

    /// Move any pending audit records onto the run state. Callers that use
    /// `execute` directly flush before handing the state back.
    pub fn flush_log(&mut self, state: &mut RunState) {
        state.execution_log.append(&mut self.log);
    }

    /// Gate decisions made so far.
    pub fn decisions(&self) -> &[crate::approval::ApprovalRecord] {
        self.gate.decisions()
    }

    /// Drive `steps` in order through gate, execution, and recovery,
    /// recording every outcome on `state`. A quit at the approval prompt
    /// cancels the run and stops the plan.
    pub async fn run_plan(&mut self, steps: &[Step], state: &mut RunState) {
        for step in steps {
            if state.is_cancelled() {
                tracing::info!(step = %step.id, "run cancelled, remaining steps not executed");
                break;
            }
            let outcome = self.run_step(step, state).await;
            state.execution_log.append(&mut self.log);
            if let Err(GateError::Aborted) = outcome {
                state.cancel("aborted at the approval prompt");
                break;
            }
        }
    }

    /// Execute one step's command. Does not gate and does not recover;
    /// `run_plan` layers those on top.
    pub async fn execute(&mut self, step: &Step) -> StepResult {
        if self.mode == Mode::DryRun {
            tracing::info!(step = %step.id, command = %step.command, "dry run, not executing");
            return StepResult::skipped(&step.id, "dry run");
        }

        let timeout = step.estimated_secs.unwrap_or(self.config.step_timeout_secs);
        let request = ShellRequest::new(step.command.clone(), step.working_directory.as_str())
            .with_timeout(Duration::from_secs(timeout));

        tracing::info!(step = %step.id, command = %step.command, "executing step");
        let started = Instant::now();
        let output = match self.spawner.run(&request).await {
            Ok(output) => output,
            Err(e) => {
                self.log.push(ExecutionRecord {
                    step_id: step.id.clone(),
                    command: step.command.clone(),
                    stdout: String::new(),
                    stderr: e.to_string(),
                    return_code: None,
                    recorded_at: Utc::now(),
                });
                let mut result = StepResult::failed(&step.id, e.to_string());
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        self.log.push(ExecutionRecord {
            step_id: step.id.clone(),
            command: step.command.clone(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            return_code: Some(output.return_code),
            recorded_at: Utc::now(),
        });

        let mut result = if output.success() {
            tracing::debug!(step = %step.id, "step succeeded");
            StepResult::success(&step.id, output.stdout)
        } else {
            let error = if !output.stderr.is_empty() {
                output.stderr.clone()
            } else {
                format!("exit code {}", output.return_code)
            };
            tracing::warn!(step = %step.id, code = output.return_code, "step failed");
            let mut failed = StepResult::failed(&step.id, error);
            failed.output = output.stdout;
            failed
        };
        result.return_code = Some(output.return_code);
        result.duration_ms = duration_ms;
        result
    }

    /// Consult the reasoning provider about a failed step, once.
    ///
    /// Returns the recovery command's result (id `{step}_recovery`), a
    /// Skipped result under the original id when the failure is safe to
    /// skip, or None when the failure stands. Provider trouble of any kind
    /// means no recovery; it never escalates the failure.
    pub async fn attempt_recovery(
        &mut self,
        step: &Step,
        failure: &StepResult,
    ) -> Result<Option<StepResult>, GateError> {
        let Some(provider) = self.provider.clone() else {
            tracing::debug!(step = %step.id, "no reasoning provider, recovery unavailable");
            return Ok(None);
        };

        let prompt = recovery_prompt(step, failure);
        let value = match generate_structured(provider.as_ref(), &prompt).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(step = %step.id, error = %e, "recovery consult failed");
                return Ok(None);
            }
        };

        let can_recover = value
            .get("can_recover")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let recovery_command = value
            .get("recovery_command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let skip_safe = value
            .get("skip_safe")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let explanation = value
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if can_recover && !recovery_command.is_empty() {
            let mut recovery = Step::new(
                format!("{}_recovery", step.id),
                format!("{} (recovery)", step.name),
                recovery_command,
            )
            .with_working_directory(step.working_directory.clone())
            .with_timeout_secs(self.config.recovery_timeout_secs)
            .with_sudo(step.requires_sudo);
            if let Some(language) = step.language {
                recovery = recovery.with_language(language);
            }

            tracing::info!(
                step = %step.id,
                command = %recovery.command,
                explanation = %explanation,
                "attempting recovery"
            );
            match self.gate_step(&recovery).await? {
                GateVerdict::Run(exec) => return Ok(Some(self.execute(&exec).await)),
                GateVerdict::Skip(reason) => {
                    tracing::warn!(step = %step.id, reason = %reason, "recovery command not approved");
                }
            }
        }

        if skip_safe {
            let reason = if explanation.is_empty() {
                "failure safe to skip".to_string()
            } else {
                format!("failure safe to skip: {explanation}")
            };
            return Ok(Some(StepResult::skipped(&step.id, reason)));
        }

        Ok(None)
    }

    async fn run_step(&mut self, step: &Step, state: &mut RunState) -> Result<(), GateError> {
        let exec_step = match self.gate_step(step).await? {
            GateVerdict::Skip(reason) => {
                tracing::info!(step = %step.id, reason = %reason, "step skipped by safety gate");
                state.record_step_result(StepResult::skipped(&step.id, reason));
                return Ok(());
            }
            GateVerdict::Run(exec_step) => exec_step,
        };

        let result = self.execute(&exec_step).await;
        record_metric(state, &exec_step, &result);

        if result.status != StepStatus::Failed {
            state.record_step_result(result);
            return Ok(());
        }

        match self.attempt_recovery(&exec_step, &result).await? {
            // the failure is safe to skip; that becomes the step's disposition
            Some(skip) if skip.step_id == step.id => {
                state.record_step_result(skip);
            }
            // a recovery command ran; on success the original id is promoted
            Some(recovery) => {
                if let Some(record) = self.log.iter().rev().find(|r| r.step_id == recovery.step_id)
                {
                    let mut recovery_step = exec_step.clone();
                    recovery_step.command = record.command.clone();
                    record_metric(state, &recovery_step, &recovery);
                }
                let recovered = recovery.is_success();
                state.record_step_result(result.clone());
                state.execution_results.push(recovery);
                if recovered {
                    state.promote_failed_step(&step.id);
                    tracing::info!(step = %step.id, "step recovered");
                } else {
                    state.errors.record(failure_error(&exec_step, &result));
                }
            }
            None => {
                state.record_step_result(result.clone());
                state.errors.record(failure_error(&exec_step, &result));
            }
        }
        Ok(())
    }

    /// Classify and gate one step. Dry-run bypasses the gate because the
    /// command never executes.
    async fn gate_step(&mut self, step: &Step) -> Result<GateVerdict, GateError> {
        if self.mode == Mode::DryRun {
            return Ok(GateVerdict::Run(step.clone()));
        }

        let summary = if step.description.is_empty() {
            &step.name
        } else {
            &step.description
        };
        let mut action = self.classifier.assess(&step.command, summary);
        // planner-required confirmation can raise the tier, never lower it
        if step.requires_confirmation && action.tier == RiskTier::Safe {
            action.tier = RiskTier::Review;
        }

        let decision = self.gate.check_action(&action).await?;
        if !decision.approved {
            let reason = decision
                .reason
                .unwrap_or_else(|| "rejected by safety gate".to_string());
            return Ok(GateVerdict::Skip(reason));
        }
        match decision.modified_command {
            Some(command) => {
                let mut edited = step.clone();
                edited.command = command;
                Ok(GateVerdict::Run(edited))
            }
            None => Ok(GateVerdict::Run(step.clone())),
        }
    }
}

fn record_metric(state: &mut RunState, step: &Step, result: &StepResult) {
    // only commands that actually ran count toward metrics
    if result.return_code.is_none() && !matches!(result.status, StepStatus::Failed) {
        return;
    }
    if let Some(language) = step.language {
        state.metrics.language_mut(language).record_command(
            &step.command,
            result.is_success(),
            result.duration_ms,
        );
    }
}

fn failure_error(step: &Step, result: &StepResult) -> SetupError {
    let message = result
        .error
        .clone()
        .unwrap_or_else(|| format!("step {} failed", step.id));
    let mut error = SetupError::from_message(message, "runner").with_command(step.command.clone());
    if let Some(language) = step.language {
        error = error.with_language(language);
    }
    error
}

fn recovery_prompt(step: &Step, failure: &StepResult) -> String {
    format!(
        "A setup step failed.\n\n\
         Step: {name}\n\
         Command: {command}\n\
         Working directory: {dir}\n\
         Exit code: {code}\n\
         Error output:\n{error}\n\n\
         Analyze the failure and respond with a JSON object:\n\
         {{\n\
         \x20 \"can_recover\": true when a single shell command can fix the problem,\n\
         \x20 \"recovery_command\": \"the command, or empty\",\n\
         \x20 \"explanation\": \"one sentence\",\n\
         \x20 \"skip_safe\": true when the step can be skipped without breaking the setup\n\
         }}",
        name = step.name,
        command = step.command,
        dir = step.working_directory,
        code = failure
            .return_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
        error = failure.error.as_deref().unwrap_or("unknown error"),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalResponse, QueuedPrompt};
    use crate::shell::{MockSpawner, TokioSpawner};
    use gw_core::config::SafetyConfig;
    use gw_core::error::ErrorKind;
    use gw_core::types::Language;
    use gw_reason::provider::ScriptedProvider;
    use std::path::PathBuf;

    fn disabled_safety() -> SafetyConfig {
        let mut config = SafetyConfig::default();
        config.enabled = false;
        config
    }

    fn make_runner(
        spawner: Arc<dyn CommandSpawner>,
        provider: Option<Arc<dyn ReasoningProvider>>,
        mode: Mode,
    ) -> StepRunner {
        let classifier = ActionClassifier::new(&SafetyConfig::default()).unwrap();
        let gate = ApprovalGate::new(disabled_safety(), Arc::new(QueuedPrompt::default()));
        StepRunner::new(
            spawner,
            classifier,
            gate,
            provider,
            ExecutionConfig::default(),
            mode,
        )
    }

    fn gated_runner(
        spawner: Arc<dyn CommandSpawner>,
        responses: Vec<ApprovalResponse>,
    ) -> (StepRunner, Arc<QueuedPrompt>) {
        let mut config = SafetyConfig::default();
        config.approval_timeout_secs = 5;
        let prompt = Arc::new(QueuedPrompt::new(responses));
        let classifier = ActionClassifier::new(&config).unwrap();
        let gate = ApprovalGate::new(config, prompt.clone());
        let runner = StepRunner::new(
            spawner,
            classifier,
            gate,
            None,
            ExecutionConfig::default(),
            Mode::Auto,
        );
        (runner, prompt)
    }

    fn make_state() -> RunState {
        RunState::new(
            PathBuf::from("/tmp/demo"),
            Mode::Auto,
            gw_core::types::Preferences::default(),
        )
    }

    #[tokio::test]
    async fn execute_records_success() {
        let spawner = Arc::new(MockSpawner::with([MockSpawner::ok(
            "node --version",
            "v20.11.0",
        )]));
        let mut runner = make_runner(spawner, None, Mode::Auto);

        let step = Step::new("check_node", "Check node", "node --version");
        let result = runner.execute(&step).await;
        assert!(result.is_success());
        assert_eq!(result.output, "v20.11.0");
        assert_eq!(result.return_code, Some(0));
        assert_eq!(runner.execution_log().len(), 1);
        assert_eq!(runner.execution_log()[0].command, "node --version");
    }

    #[tokio::test]
    async fn execute_maps_nonzero_exit_to_failure() {
        let spawner = Arc::new(MockSpawner::with([MockSpawner::fail(
            "npm install",
            "ERESOLVE unable to resolve dependency tree",
        )]));
        let mut runner = make_runner(spawner, None, Mode::Auto);

        let step = Step::new("deps", "Install deps", "npm install");
        let result = runner.execute(&step).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("ERESOLVE"));
        assert_eq!(result.return_code, Some(1));
    }

    #[tokio::test]
    async fn dry_run_spawns_nothing() {
        let spawner = Arc::new(MockSpawner::new());
        let mut runner = make_runner(spawner.clone(), None, Mode::DryRun);
        let mut state = make_state();

        let steps = vec![Step::new("s1", "Step", "rm -rf /tmp/x")];
        runner.run_plan(&steps, &mut state).await;

        assert!(spawner.commands().is_empty());
        assert_eq!(state.skipped_steps, vec!["s1".to_string()]);
        assert_eq!(
            state.execution_results[0].error.as_deref(),
            Some("dry run")
        );
    }

    #[tokio::test]
    async fn recovery_success_promotes_the_original_step() {
        let provider = Arc::new(ScriptedProvider::new([r#"{
            "can_recover": true,
            "recovery_command": "true",
            "explanation": "retry once",
            "skip_safe": false
        }"#]));
        let mut runner = make_runner(
            Arc::new(TokioSpawner::default()),
            Some(provider.clone()),
            Mode::Auto,
        );
        let mut state = make_state();

        let steps = vec![Step::new("s1", "Flaky step", "false")];
        runner.run_plan(&steps, &mut state).await;

        assert_eq!(state.completed_steps, vec!["s1".to_string()]);
        assert!(state.failed_steps.is_empty());
        // original failure and recovery success are both in the audit trail
        assert_eq!(state.execution_results.len(), 2);
        assert_eq!(state.execution_results[1].step_id, "s1_recovery");
        assert!(state.execution_results[1].is_success());
        assert!(provider.prompts()[0].contains("Command: false"));
    }

    #[tokio::test]
    async fn skip_safe_failure_becomes_a_soft_skip() {
        let provider = Arc::new(ScriptedProvider::new([r#"{
            "can_recover": false,
            "recovery_command": "",
            "explanation": "optional tooling",
            "skip_safe": true
        }"#]));
        let mut runner = make_runner(
            Arc::new(TokioSpawner::default()),
            Some(provider),
            Mode::Auto,
        );
        let mut state = make_state();

        let steps = vec![Step::new("s1", "Optional step", "false")];
        runner.run_plan(&steps, &mut state).await;

        assert!(state.failed_steps.is_empty());
        assert_eq!(state.skipped_steps, vec!["s1".to_string()]);
        let last = state.execution_results.last().unwrap();
        assert!(last.error.as_deref().unwrap().contains("safe to skip"));
    }

    #[tokio::test]
    async fn unrecovered_failure_is_tracked() {
        let mut runner = make_runner(Arc::new(TokioSpawner::default()), None, Mode::Auto);
        let mut state = make_state();

        let steps = vec![Step::new("s1", "Broken step", "false").with_language(Language::NodeJs)];
        runner.run_plan(&steps, &mut state).await;

        assert_eq!(state.failed_steps, vec!["s1".to_string()]);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors.all()[0].language, Some(Language::NodeJs));
        let metrics = state.metrics.language(Language::NodeJs).unwrap();
        assert_eq!(metrics.commands_total, 1);
        assert_eq!(metrics.commands_failed, 1);
    }

    #[tokio::test]
    async fn timeout_is_classified_as_timeout_error() {
        let mut runner = make_runner(Arc::new(TokioSpawner::default()), None, Mode::Auto);
        let mut state = make_state();

        let steps = vec![Step::new("slow", "Slow step", "sleep 30").with_timeout_secs(1)];
        runner.run_plan(&steps, &mut state).await;

        assert_eq!(state.failed_steps, vec!["slow".to_string()]);
        assert_eq!(state.errors.all()[0].kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn gate_rejection_skips_the_step() {
        let spawner = Arc::new(MockSpawner::new());
        let (mut runner, prompt) = gated_runner(spawner.clone(), vec![ApprovalResponse::Reject]);
        let mut state = make_state();

        let steps = vec![Step::new("deps", "Install deps", "npm install")];
        runner.run_plan(&steps, &mut state).await;

        assert_eq!(prompt.asked(), vec!["npm install".to_string()]);
        assert!(spawner.commands().is_empty());
        assert_eq!(state.skipped_steps, vec!["deps".to_string()]);
        assert_eq!(
            state.execution_results[0].error.as_deref(),
            Some("user skipped")
        );
    }

    #[tokio::test]
    async fn edited_command_replaces_the_original() {
        let spawner = Arc::new(MockSpawner::new());
        let (mut runner, _prompt) = gated_runner(
            spawner.clone(),
            vec![ApprovalResponse::Edit("npm ci".to_string())],
        );
        let mut state = make_state();

        let steps = vec![Step::new("deps", "Install deps", "npm install")];
        runner.run_plan(&steps, &mut state).await;

        assert_eq!(spawner.commands(), vec!["npm ci".to_string()]);
        assert_eq!(state.completed_steps, vec!["deps".to_string()]);
    }

    #[tokio::test]
    async fn quit_cancels_the_run() {
        let spawner = Arc::new(MockSpawner::new());
        let (mut runner, _prompt) = gated_runner(spawner.clone(), vec![ApprovalResponse::Quit]);
        let mut state = make_state();

        let steps = vec![
            Step::new("deps", "Install deps", "npm install"),
            Step::new("build", "Build", "npm run build"),
        ];
        runner.run_plan(&steps, &mut state).await;

        assert!(state.user_cancelled);
        assert!(state.workflow_should_end);
        assert!(spawner.commands().is_empty());
        assert!(state.execution_results.is_empty());
    }

    #[tokio::test]
    async fn required_confirmation_raises_safe_to_review() {
        let spawner = Arc::new(MockSpawner::new());
        let (mut runner, prompt) = gated_runner(spawner.clone(), vec![ApprovalResponse::Approve]);
        let mut state = make_state();

        // "pwd" classifies safe; the confirmation requirement forces a prompt
        let mut step = Step::new("where", "Show directory", "pwd");
        step.requires_confirmation = true;
        runner.run_plan(&[step], &mut state).await;

        assert_eq!(prompt.asked(), vec!["pwd".to_string()]);
        assert_eq!(state.completed_steps, vec!["where".to_string()]);
    }
}
