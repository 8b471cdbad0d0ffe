use chrono::{DateTime, Utc};
use gw_core::error::ErrorTracker;
use gw_core::metrics::MetricsRecorder;
use gw_core::types::{
    CheckResult, ExecutionRecord, InstallPlan, Language, LanguageConfigs, Mode, Preferences,
    StepResult, StepStatus,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// WorkflowPath
// ---------------------------------------------------------------------------

/// Route chosen by the orchestrate stage based on project complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPath {
    FastTrack,
    Standard,
    Comprehensive,
}

impl WorkflowPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPath::FastTrack => "fast-track",
            WorkflowPath::Standard => "standard",
            WorkflowPath::Comprehensive => "comprehensive",
        }
    }
}

impl Default for WorkflowPath {
    fn default() -> Self {
        WorkflowPath::Standard
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Everything one setup run knows, threaded through the stages by value.
///
/// Exactly one stage owns the state at any time; stages take it, mutate it,
/// and hand it back. Diagnostics (errors, metrics) are owned here so two
/// concurrent runs can never bleed into each other.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    // Identity
    pub project_path: PathBuf,
    pub project_name: String,
    pub run_id: String,
    pub mode: Mode,
    pub preferences: Preferences,

    // Discovery (scan)
    /// Languages in the order the scanner found them.
    pub detected_languages: Vec<Language>,
    pub language_configs: LanguageConfigs,

    // Analysis
    pub installation_order: Vec<Language>,
    pub compatibility_issues: Vec<String>,
    pub optimizations: Vec<String>,
    pub security_concerns: Vec<String>,

    // Orchestration
    pub workflow_path: WorkflowPath,

    // Plan
    pub plan: Option<InstallPlan>,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,

    // Language queue
    pub execution_queue: Vec<Language>,
    pub completed_languages: Vec<Language>,
    pub failed_languages: Vec<Language>,

    // Results
    pub execution_results: Vec<StepResult>,
    pub execution_log: Vec<ExecutionRecord>,
    pub verification_results: Vec<CheckResult>,
    pub health_score: Option<u8>,
    pub report: Option<String>,
    pub report_path: Option<PathBuf>,

    // Diagnostics, owned by this run
    pub errors: ErrorTracker,
    pub metrics: MetricsRecorder,

    // Workflow control
    pub workflow_should_end: bool,
    pub has_more_languages: bool,
    pub all_languages_processed: bool,
    pub fatal_error: Option<String>,
    pub user_cancelled: bool,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(project_path: impl Into<PathBuf>, mode: Mode, preferences: Preferences) -> Self {
        let project_path = project_path.into();
        let project_name = project_name_of(&project_path);
        let run_id = uuid::Uuid::new_v4().to_string();
        let metrics = MetricsRecorder::new(&run_id, &project_name);
        Self {
            project_path,
            project_name,
            run_id,
            mode,
            preferences,
            detected_languages: Vec::new(),
            language_configs: LanguageConfigs::new(),
            installation_order: Vec::new(),
            compatibility_issues: Vec::new(),
            optimizations: Vec::new(),
            security_concerns: Vec::new(),
            workflow_path: WorkflowPath::default(),
            plan: None,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            execution_queue: Vec::new(),
            completed_languages: Vec::new(),
            failed_languages: Vec::new(),
            execution_results: Vec::new(),
            execution_log: Vec::new(),
            verification_results: Vec::new(),
            health_score: None,
            report: None,
            report_path: None,
            errors: ErrorTracker::new(),
            metrics,
            workflow_should_end: false,
            has_more_languages: false,
            all_languages_processed: false,
            fatal_error: None,
            user_cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    // -- language queue -----------------------------------------------------

    /// Mark a language as set up. Refuses if the language already failed;
    /// a language is never in both sets.
    pub fn mark_language_completed(&mut self, language: Language) {
        if self.failed_languages.contains(&language) {
            tracing::warn!(language = %language, "refusing to complete a language already marked failed");
            return;
        }
        if !self.completed_languages.contains(&language) {
            self.completed_languages.push(language);
        }
    }

    /// Mark a language as failed. Refuses if the language already completed.
    pub fn mark_language_failed(&mut self, language: Language) {
        if self.completed_languages.contains(&language) {
            tracing::warn!(language = %language, "refusing to fail a language already marked completed");
            return;
        }
        if !self.failed_languages.contains(&language) {
            self.failed_languages.push(language);
        }
    }

    /// Queue entries not yet completed or failed, in queue order.
    pub fn remaining_languages(&self) -> Vec<Language> {
        self.execution_queue
            .iter()
            .copied()
            .filter(|l| !self.completed_languages.contains(l) && !self.failed_languages.contains(l))
            .collect()
    }

    /// Recompute the queue control flags from the current sets.
    pub fn update_queue_flags(&mut self) {
        let remaining = self.remaining_languages();
        self.has_more_languages = !remaining.is_empty();
        self.all_languages_processed = remaining.is_empty();
    }

    // -- step bookkeeping ---------------------------------------------------

    /// Record a step outcome and bucket its id by status.
    pub fn record_step_result(&mut self, result: StepResult) {
        let id = result.step_id.clone();
        match result.status {
            StepStatus::Success => {
                if !self.completed_steps.contains(&id) {
                    self.completed_steps.push(id);
                }
            }
            StepStatus::Failed => {
                if !self.failed_steps.contains(&id) {
                    self.failed_steps.push(id);
                }
            }
            StepStatus::Skipped => {
                if !self.skipped_steps.contains(&id) {
                    self.skipped_steps.push(id);
                }
            }
        }
        self.execution_results.push(result);
    }

    /// Move a step id from failed to completed after a successful recovery.
    /// Returns whether a promotion happened.
    pub fn promote_failed_step(&mut self, step_id: &str) -> bool {
        let Some(pos) = self.failed_steps.iter().position(|s| s == step_id) else {
            return false;
        };
        self.failed_steps.remove(pos);
        if !self.completed_steps.contains(&step_id.to_string()) {
            self.completed_steps.push(step_id.to_string());
        }
        true
    }

    // -- control ------------------------------------------------------------

    pub fn is_cancelled(&self) -> bool {
        self.user_cancelled || self.fatal_error.is_some()
    }

    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.user_cancelled = true;
        self.workflow_should_end = true;
        let reason = reason.into();
        tracing::info!(reason = %reason, "run cancelled");
    }
}

fn project_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state() -> RunState {
        RunState::new("/tmp/demo", Mode::Auto, Preferences::default())
    }

    #[test]
    fn completed_and_failed_stay_disjoint() {
        let mut state = make_state();
        state.execution_queue = vec![Language::NodeJs, Language::Rust];

        state.mark_language_completed(Language::NodeJs);
        state.mark_language_failed(Language::NodeJs);
        assert_eq!(state.completed_languages, vec![Language::NodeJs]);
        assert!(state.failed_languages.is_empty());

        state.mark_language_failed(Language::Rust);
        state.mark_language_completed(Language::Rust);
        assert_eq!(state.failed_languages, vec![Language::Rust]);
        assert_eq!(state.completed_languages, vec![Language::NodeJs]);

        // double insertion is a no-op
        state.mark_language_completed(Language::NodeJs);
        assert_eq!(state.completed_languages.len(), 1);
    }

    #[test]
    fn remaining_preserves_queue_order() {
        let mut state = make_state();
        state.execution_queue = vec![Language::JavaMaven, Language::NodeJs, Language::PythonPip];
        state.mark_language_completed(Language::NodeJs);

        assert_eq!(
            state.remaining_languages(),
            vec![Language::JavaMaven, Language::PythonPip]
        );

        state.update_queue_flags();
        assert!(state.has_more_languages);
        assert!(!state.all_languages_processed);

        state.mark_language_failed(Language::JavaMaven);
        state.mark_language_completed(Language::PythonPip);
        state.update_queue_flags();
        assert!(!state.has_more_languages);
        assert!(state.all_languages_processed);
    }

    #[test]
    fn step_results_bucket_by_status() {
        let mut state = make_state();
        state.record_step_result(StepResult::success("a", "ok"));
        state.record_step_result(StepResult::failed("b", "boom"));
        state.record_step_result(StepResult::skipped("c", "dry run"));

        assert_eq!(state.completed_steps, vec!["a"]);
        assert_eq!(state.failed_steps, vec!["b"]);
        assert_eq!(state.skipped_steps, vec!["c"]);
        assert_eq!(state.execution_results.len(), 3);
    }

    #[test]
    fn promotion_moves_a_failed_step_once() {
        let mut state = make_state();
        state.record_step_result(StepResult::failed("s1", "exit 1"));
        assert_eq!(state.failed_steps, vec!["s1"]);

        assert!(state.promote_failed_step("s1"));
        assert_eq!(state.completed_steps, vec!["s1"]);
        assert!(state.failed_steps.is_empty());

        // second promotion has nothing to move
        assert!(!state.promote_failed_step("s1"));
        assert_eq!(state.completed_steps, vec!["s1"]);
    }

    #[test]
    fn cancel_sets_control_flags() {
        let mut state = make_state();
        assert!(!state.is_cancelled());
        state.cancel("ctrl-c");
        assert!(state.is_cancelled());
        assert!(state.workflow_should_end);
    }
}
