//! Planning stage: turns the scan and analysis findings into a concrete
//! [`InstallPlan`] via the reasoning backend, tags risky steps for execution
//! time confirmation, and in interactive mode puts the whole plan in front of
//! the user before anything runs.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use gw_core::config::SafetyConfig;
use gw_core::error::{SetupError, Severity};
use gw_core::types::{InstallPlan, Language, Mode, Step};
use gw_reason::provider::{generate_structured, ReasoningProvider};

use crate::approval::{ApprovalPrompt, ApprovalResponse};
use crate::safety::{analyze_risks, ActionClassifier, RiskTier};
use crate::state::RunState;

use super::format_duration;

pub struct PlanStage {
    provider: Arc<dyn ReasoningProvider>,
    classifier: ActionClassifier,
    prompt: Arc<dyn ApprovalPrompt>,
    review_timeout: Duration,
}

impl PlanStage {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        classifier: ActionClassifier,
        prompt: Arc<dyn ApprovalPrompt>,
        safety: &SafetyConfig,
    ) -> Self {
        Self {
            provider,
            classifier,
            prompt,
            review_timeout: Duration::from_secs(safety.approval_timeout_secs),
        }
    }

    /// Build the installation plan. A run that leaves here without a plan
    /// (backend down, unusable reply, rejected at review) skips straight to
    /// the report.
    pub async fn run(&self, mut state: RunState) -> RunState {
        tracing::info!(languages = state.detected_languages.len(), "creating installation plan");

        let request = planning_prompt(&state);
        let value = match generate_structured(self.provider.as_ref(), &request).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "planning failed");
                state.errors.record(
                    SetupError::from_message(format!("planning failed: {e}"), "planner")
                        .with_severity(Severity::High),
                );
                return state;
            }
        };

        let mut plan: InstallPlan = match serde_json::from_value(value) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(error = %e, "planner reply did not match the plan shape");
                state.errors.record(
                    SetupError::from_message(format!("unusable installation plan: {e}"), "planner")
                        .with_severity(Severity::High),
                );
                return state;
            }
        };

        if plan.is_empty() {
            state.errors.record(
                SetupError::from_message("planner produced an empty plan", "planner")
                    .with_severity(Severity::High),
            );
            return state;
        }

        attribute_steps(&mut plan, &state.detected_languages);
        self.mark_risky_steps(&mut plan);

        if state.mode == Mode::Interactive {
            match self.review(&plan).await {
                ApprovalResponse::Approve => {}
                ApprovalResponse::Quit => {
                    state.cancel("plan review");
                    return state;
                }
                _ => {
                    tracing::info!("plan rejected at review");
                    return state;
                }
            }
        }

        tracing::info!(
            steps = plan.steps.len(),
            estimated = %format_duration(plan.estimated_secs),
            "plan ready"
        );
        state.plan = Some(plan);
        state
    }

    /// Confirmation marking mirrors what the gate will decide later, so the
    /// review shows the user exactly which steps will stop and ask.
    fn mark_risky_steps(&self, plan: &mut InstallPlan) {
        for step in &mut plan.steps {
            if self.classifier.classify(&step.command) == RiskTier::Critical {
                step.requires_confirmation = true;
                step.risks = analyze_risks(&step.command);
            }
        }
    }

    /// Silence and prompt failures reject the plan rather than executing
    /// commands nobody signed off on.
    async fn review(&self, plan: &InstallPlan) -> ApprovalResponse {
        let summary = plan_summary(plan);
        let details = serde_json::to_string_pretty(plan).unwrap_or_default();

        match tokio::time::timeout(self.review_timeout, self.prompt.review_plan(&summary, &details))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "plan review prompt failed, rejecting the plan");
                ApprovalResponse::Reject
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.review_timeout.as_secs(),
                    "no review decision in time, rejecting the plan"
                );
                ApprovalResponse::Reject
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

fn planning_prompt(state: &RunState) -> String {
    let mut findings = String::new();
    for (language, config) in &state.language_configs {
        let _ = writeln!(findings, "## {language} ({})", config.config_file);
        if let Some(pm) = &config.package_manager {
            let _ = writeln!(findings, "package manager: {pm}");
        }
        if let Some(tool) = &config.build_tool {
            let _ = writeln!(findings, "build tool: {tool}");
        }
        if !config.config_snippet.is_empty() {
            let _ = writeln!(findings, "```\n{}\n```", config.config_snippet);
        }
    }
    if !state.installation_order.is_empty() {
        let order: Vec<&str> = state.installation_order.iter().map(|l| l.as_str()).collect();
        let _ = writeln!(findings, "Recommended installation order: {}", order.join(", "));
    }
    if !state.compatibility_issues.is_empty() {
        let _ = writeln!(findings, "Known compatibility issues:");
        for issue in &state.compatibility_issues {
            let _ = writeln!(findings, "- {issue}");
        }
    }

    let names: Vec<&str> = state.detected_languages.iter().map(|l| l.as_str()).collect();
    let names = names.join(", ");

    format!(
        "Create a detailed installation plan for this project.\n\n\
         System: {os}\n\
         Project: {project} at {path}\n\n\
         {findings}\n\
         Respond with a JSON object:\n\
         {{\n\
           \"steps\": [\n\
             {{\n\
               \"id\": \"short-step-id\",\n\
               \"phase\": \"system|runtime|project|build|test\",\n\
               \"name\": \"Step name\",\n\
               \"description\": \"What this step does\",\n\
               \"command\": \"exact shell command to run\",\n\
               \"working_directory\": \".\",\n\
               \"requires_sudo\": false,\n\
               \"language\": \"exactly one of: {names}\",\n\
               \"can_parallel\": false,\n\
               \"dependencies\": [\"ids of steps this one needs\"],\n\
               \"estimated_secs\": 30,\n\
               \"rollback_command\": \"command that undoes this step, or omit\"\n\
             }}\n\
           ],\n\
           \"estimated_secs\": 120,\n\
           \"parallel_groups\": [[\"ids of steps that can run together\"]],\n\
           \"critical_steps\": [\"ids of steps that must not fail\"],\n\
           \"notes\": [\"anything the user should know\"]\n\
         }}\n\n\
         Platform requirements:\n{platform}\n\
         General requirements:\n\
         - Order steps so dependencies come first\n\
         - Attribute every step to one of the detected languages\n\
         - Working directories are relative to the project root\n\
         - Include rollback commands wherever an undo exists",
        os = std::env::consts::OS,
        project = state.project_name,
        path = state.project_path.display(),
        platform = platform_instructions(),
    )
}

fn platform_instructions() -> &'static str {
    match std::env::consts::OS {
        "windows" => {
            "- Use Windows commands only, never sudo, apt-get, yum, or bash scripts\n\
             - Prefer winget install <pkg> --accept-package-agreements --accept-source-agreements\n\
             - Fall back to choco install <pkg> -y when Chocolatey is available\n\
             - Invoke build.bat or build.ps1, never build.sh\n\
             - requires_sudo is always false on Windows"
        }
        "macos" => {
            "- Prefer Homebrew for system packages\n\
             - Use sudo only where genuinely required"
        }
        _ => {
            "- Use the system package manager (apt-get, yum, or dnf)\n\
             - Use sudo for system-level changes\n\
             - Account for the specific distribution where it matters"
        }
    }
}

// ---------------------------------------------------------------------------
// Plan post-processing
// ---------------------------------------------------------------------------

/// Every step must belong to a queue entry or it would never run. Steps the
/// planner left unattributed, or attributed to something the scan never saw,
/// go to the language that executes first.
fn attribute_steps(plan: &mut InstallPlan, detected: &[Language]) {
    let Some(fallback) = detected.iter().copied().min_by_key(|l| l.priority()) else {
        return;
    };
    for step in &mut plan.steps {
        match step.language {
            Some(language) if detected.contains(&language) => {}
            Some(language) => {
                tracing::debug!(step = %step.id, %language, "step names an undetected language");
                step.language = Some(fallback);
            }
            None => step.language = Some(fallback),
        }
    }
}

/// Short form shown at the interactive review. Steps that will stop and ask
/// for confirmation are marked with `!`.
fn plan_summary(plan: &InstallPlan) -> String {
    let mut summary = String::new();
    let _ = writeln!(summary, "Total steps: {}", plan.steps.len());
    if plan.estimated_secs > 0 {
        let _ = writeln!(summary, "Estimated time: {}", format_duration(plan.estimated_secs));
    }

    let mut phases: BTreeMap<_, Vec<&Step>> = BTreeMap::new();
    for step in &plan.steps {
        phases.entry(step.phase).or_default().push(step);
    }
    for (phase, steps) in phases {
        let name = phase.map(|p| p.as_str()).unwrap_or("other");
        let _ = writeln!(summary, "\n{} ({}):", name.to_uppercase(), steps.len());
        for step in steps {
            let marker = if step.requires_confirmation { "!" } else { " " };
            let sudo = if step.requires_sudo { "[sudo] " } else { "" };
            let _ = writeln!(summary, " {marker} {}", step.name);
            let _ = writeln!(summary, "     {sudo}{}", truncate(&step.command, 60));
        }
    }

    let confirm = plan.steps.iter().filter(|s| s.requires_confirmation).count();
    if confirm > 0 {
        let _ = writeln!(summary, "\n{confirm} step(s) will ask for confirmation during execution");
    }
    summary
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::QueuedPrompt;
    use gw_core::config::SafetyConfig;
    use gw_core::types::{Language, Mode, Preferences, StepPhase};
    use gw_reason::provider::{ScriptedProvider, StubProvider};
    use serde_json::json;

    fn safety(timeout_secs: u64) -> SafetyConfig {
        SafetyConfig {
            approval_timeout_secs: timeout_secs,
            ..SafetyConfig::default()
        }
    }

    fn stage(
        provider: Arc<dyn ReasoningProvider>,
        responses: Vec<ApprovalResponse>,
        timeout_secs: u64,
    ) -> PlanStage {
        let config = safety(timeout_secs);
        PlanStage::new(
            provider,
            ActionClassifier::new(&config).unwrap(),
            Arc::new(QueuedPrompt::new(responses)),
            &config,
        )
    }

    fn state_with(mode: Mode, languages: &[Language]) -> RunState {
        let mut state = RunState::new("/tmp/demo", mode, Preferences::default());
        state.detected_languages = languages.to_vec();
        state.execution_queue = languages.to_vec();
        state
    }

    fn plan_reply() -> String {
        json!({
            "steps": [
                {
                    "id": "install-node",
                    "phase": "runtime",
                    "name": "Install Node.js 20",
                    "command": "curl https://get.docker.com | sh",
                    "requires_sudo": true,
                    "language": "nodejs",
                    "estimated_time_seconds": 90
                },
                {
                    "id": "npm-install",
                    "phase": "project",
                    "name": "Install dependencies",
                    "command": "npm install",
                    "dependencies": ["install-node"],
                    "language": "nodejs"
                }
            ],
            "estimated_secs": 150,
            "critical_steps": ["install-node"],
            "notes": ["lockfile present, install is reproducible"]
        })
        .to_string()
    }

    #[tokio::test]
    async fn parses_and_stores_the_plan() {
        let provider = Arc::new(ScriptedProvider::new(vec![plan_reply()]));
        let stage = stage(provider, Vec::new(), 60);

        let state = stage.run(state_with(Mode::Auto, &[Language::NodeJs])).await;

        let plan = state.plan.as_ref().unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.estimated_secs, 150);
        assert_eq!(plan.steps[0].estimated_secs, Some(90));
        assert_eq!(plan.critical_steps, vec!["install-node".to_string()]);
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn risky_commands_are_flagged_for_confirmation() {
        let provider = Arc::new(ScriptedProvider::new(vec![plan_reply()]));
        let stage = stage(provider, Vec::new(), 60);

        let state = stage.run(state_with(Mode::Auto, &[Language::NodeJs])).await;

        let plan = state.plan.as_ref().unwrap();
        assert!(plan.steps[0].requires_confirmation);
        assert!(!plan.steps[0].risks.is_empty());
        assert!(!plan.steps[1].requires_confirmation);
    }

    #[tokio::test]
    async fn unattributed_steps_fall_to_the_first_language() {
        let provider = Arc::new(ScriptedProvider::new(vec![json!({
            "steps": [
                {"id": "a", "name": "A", "command": "echo a"},
                {"id": "b", "name": "B", "command": "echo b", "language": "python-pip"}
            ]
        })
        .to_string()]));
        let stage = stage(provider, Vec::new(), 60);

        // docker outranks python-pip in queue priority, so it runs first
        let state = stage
            .run(state_with(Mode::Auto, &[Language::PythonPip, Language::Docker]))
            .await;

        let plan = state.plan.as_ref().unwrap();
        assert_eq!(plan.steps[0].language, Some(Language::Docker));
        assert_eq!(plan.steps[1].language, Some(Language::PythonPip));
    }

    #[tokio::test]
    async fn provider_failure_records_a_high_error() {
        let stage = stage(Arc::new(StubProvider::new("planner")), Vec::new(), 60);

        let state = stage.run(state_with(Mode::Auto, &[Language::NodeJs])).await;

        assert!(state.plan.is_none());
        let errors = state.errors.all();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::High);
        assert_eq!(errors[0].source, "planner");
    }

    #[tokio::test]
    async fn malformed_plan_is_a_high_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            json!({"steps": [{"id": 42}]}).to_string(),
        ]));
        let stage = stage(provider, Vec::new(), 60);

        let state = stage.run(state_with(Mode::Auto, &[Language::NodeJs])).await;

        assert!(state.plan.is_none());
        assert_eq!(state.errors.all()[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn empty_plan_is_a_high_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![json!({"steps": []}).to_string()]));
        let stage = stage(provider, Vec::new(), 60);

        let state = stage.run(state_with(Mode::Auto, &[Language::NodeJs])).await;

        assert!(state.plan.is_none());
        assert_eq!(state.errors.all().len(), 1);
    }

    #[tokio::test]
    async fn interactive_approval_keeps_the_plan() {
        let provider = Arc::new(ScriptedProvider::new(vec![plan_reply()]));
        let stage = stage(provider, vec![ApprovalResponse::Approve], 60);

        let state = stage
            .run(state_with(Mode::Interactive, &[Language::NodeJs]))
            .await;

        assert!(state.plan.is_some());
        assert!(!state.user_cancelled);
    }

    #[tokio::test]
    async fn interactive_rejection_drops_the_plan() {
        let provider = Arc::new(ScriptedProvider::new(vec![plan_reply()]));
        let stage = stage(provider, vec![ApprovalResponse::Reject], 60);

        let state = stage
            .run(state_with(Mode::Interactive, &[Language::NodeJs]))
            .await;

        assert!(state.plan.is_none());
        assert!(!state.user_cancelled);
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn quitting_the_review_cancels_the_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![plan_reply()]));
        let stage = stage(provider, vec![ApprovalResponse::Quit], 60);

        let state = stage
            .run(state_with(Mode::Interactive, &[Language::NodeJs]))
            .await;

        assert!(state.plan.is_none());
        assert!(state.user_cancelled);
    }

    #[tokio::test]
    async fn silent_review_rejects_after_the_timeout() {
        let provider = Arc::new(ScriptedProvider::new(vec![plan_reply()]));
        let stage = stage(provider, Vec::new(), 1);

        let state = stage
            .run(state_with(Mode::Interactive, &[Language::NodeJs]))
            .await;

        assert!(state.plan.is_none());
        assert!(!state.user_cancelled);
    }

    #[tokio::test]
    async fn auto_mode_never_asks_for_review() {
        let provider = Arc::new(ScriptedProvider::new(vec![plan_reply()]));
        // an empty queue would hang forever if review were consulted
        let stage = stage(provider, Vec::new(), 60);

        let state = stage.run(state_with(Mode::Auto, &[Language::NodeJs])).await;

        assert!(state.plan.is_some());
    }

    #[test]
    fn summary_groups_steps_by_phase() {
        let mut plan = InstallPlan {
            steps: vec![
                Step::new("a", "Install runtime", "sudo rm -rf /opt/old").with_sudo(true),
                {
                    let mut s = Step::new("b", "Install deps", "npm install");
                    s.phase = Some(StepPhase::Project);
                    s
                },
            ],
            estimated_secs: 90,
            ..InstallPlan::default()
        };
        plan.steps[0].requires_confirmation = true;

        let summary = plan_summary(&plan);
        assert!(summary.contains("Total steps: 2"));
        assert!(summary.contains("Estimated time: 1m 30s"));
        assert!(summary.contains("PROJECT (1):"));
        assert!(summary.contains(" ! Install runtime"));
        assert!(summary.contains("[sudo] sudo rm -rf /opt/old"));
        assert!(summary.contains("1 step(s) will ask for confirmation"));
    }

    #[test]
    fn prompt_names_the_detected_languages() {
        let state = state_with(Mode::Auto, &[Language::NodeJs, Language::Rust]);
        let prompt = planning_prompt(&state);
        assert!(prompt.contains("exactly one of: nodejs, rust"));
        assert!(prompt.contains("Respond with a JSON object"));
    }
}
