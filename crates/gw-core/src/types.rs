use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// A detected project ecosystem awaiting setup.
///
/// One variant per config-file signature the scanner recognizes. Python and
/// Java split by package/build tooling because the setup recipes differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "nodejs")]
    NodeJs,
    #[serde(rename = "python-pip")]
    PythonPip,
    #[serde(rename = "python-poetry")]
    PythonPoetry,
    #[serde(rename = "java-maven")]
    JavaMaven,
    #[serde(rename = "java-gradle")]
    JavaGradle,
    #[serde(rename = "ruby")]
    Ruby,
    #[serde(rename = "golang")]
    Golang,
    #[serde(rename = "rust")]
    Rust,
    #[serde(rename = "docker")]
    Docker,
    #[serde(rename = "make")]
    Make,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::NodeJs => "nodejs",
            Language::PythonPip => "python-pip",
            Language::PythonPoetry => "python-poetry",
            Language::JavaMaven => "java-maven",
            Language::JavaGradle => "java-gradle",
            Language::Ruby => "ruby",
            Language::Golang => "golang",
            Language::Rust => "rust",
            Language::Docker => "docker",
            Language::Make => "make",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "nodejs" => Some(Language::NodeJs),
            "python-pip" => Some(Language::PythonPip),
            "python-poetry" => Some(Language::PythonPoetry),
            "java-maven" => Some(Language::JavaMaven),
            "java-gradle" => Some(Language::JavaGradle),
            "ruby" => Some(Language::Ruby),
            "golang" => Some(Language::Golang),
            "rust" => Some(Language::Rust),
            "docker" => Some(Language::Docker),
            "make" => Some(Language::Make),
            _ => None,
        }
    }

    /// Static execution priority. Toolchains that other queued toolchains
    /// may depend on run first; lower sorts earlier. Ties between equal
    /// priorities are broken by detection order.
    pub fn priority(&self) -> u8 {
        match self {
            Language::Docker => 0,
            Language::JavaMaven | Language::JavaGradle => 1,
            Language::NodeJs => 2,
            Language::PythonPip | Language::PythonPoetry => 3,
            Language::Golang => 4,
            Language::Rust => 5,
            Language::Ruby => 6,
            Language::Make => 7,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Run mode & preferences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Auto,
    Interactive,
    DryRun,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Interactive => "interactive",
            Mode::DryRun => "dry-run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Mode::Auto),
            "interactive" => Some(Mode::Interactive),
            "dry-run" | "dry_run" => Some(Mode::DryRun),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub skip_verification: bool,
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default)]
    pub verbose: bool,
}

// ---------------------------------------------------------------------------
// LanguageConfig
// ---------------------------------------------------------------------------

/// Scanner findings for one detected language: which config file matched,
/// a snippet of its content, and tool hints the handlers consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Config file that triggered detection (e.g. `package.json`).
    pub config_file: String,
    /// First portion of the config file content, for analysis prompts.
    pub config_snippet: String,
    /// Package manager hint (`npm`/`yarn` for node, `pip`/`poetry` for python).
    pub package_manager: Option<String>,
    /// Build tool hint (`maven`/`gradle` for java).
    pub build_tool: Option<String>,
}

/// Map of per-language scanner findings, ordered for stable iteration.
pub type LanguageConfigs = BTreeMap<Language, LanguageConfig>;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Installation phase a step belongs to. Phase order is total: system
/// packages before language runtimes before project dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    System,
    Runtime,
    Project,
    Build,
    Test,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPhase::System => "system",
            StepPhase::Runtime => "runtime",
            StepPhase::Project => "project",
            StepPhase::Build => "build",
            StepPhase::Test => "test",
        }
    }
}

/// A planned unit of work: one shell-level command with its execution
/// envelope. Steps come from the planner or from a language handler's
/// built-in recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    #[serde(default)]
    pub requires_sudo: bool,
    #[serde(default)]
    pub phase: Option<StepPhase>,
    /// Language this step belongs to, when the planner attributed one.
    #[serde(default)]
    pub language: Option<Language>,
    /// Per-step timeout; the runner falls back to its default when absent.
    #[serde(default, alias = "estimated_time_seconds")]
    pub estimated_secs: Option<u64>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub risks: Vec<String>,
    /// Advisory undo command. Recorded for reports, never invoked.
    #[serde(default)]
    pub rollback_command: Option<String>,
    /// Plan metadata: the step could safely run alongside its group.
    /// The runner is sequential and does not exploit this.
    #[serde(default)]
    pub can_parallel: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_working_directory() -> String {
    ".".to_string()
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            command: command.into(),
            working_directory: default_working_directory(),
            requires_sudo: false,
            phase: None,
            language: None,
            estimated_secs: None,
            requires_confirmation: false,
            risks: Vec::new(),
            rollback_command: None,
            can_parallel: false,
            dependencies: Vec::new(),
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.estimated_secs = Some(secs);
        self
    }

    pub fn with_sudo(mut self, requires_sudo: bool) -> Self {
        self.requires_sudo = requires_sudo;
        self
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome of executing one step. The runner never raises: every failure
/// mode lands here as `Failed` with a populated `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub return_code: Option<i32>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    pub fn success(step_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Success,
            output: output.into(),
            error: None,
            return_code: Some(0),
            duration_ms: 0,
        }
    }

    pub fn failed(step_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            output: String::new(),
            error: Some(error.into()),
            return_code: None,
            duration_ms: 0,
        }
    }

    pub fn skipped(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: String::new(),
            error: Some(reason.into()),
            return_code: None,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Audit-log entry for one spawned command, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub step_id: String,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub return_code: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// InstallPlan
// ---------------------------------------------------------------------------

/// Ordered installation plan produced by the plan stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallPlan {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub estimated_secs: u64,
    /// Groups of step ids the planner judged parallel-safe. Metadata only.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
    #[serde(default)]
    pub critical_steps: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl InstallPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps the planner attributed to `language`, in plan order.
    pub fn steps_for(&self, language: Language) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.language == Some(language))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Command,
    File,
}

/// One post-setup verification probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub id: String,
    pub name: String,
    pub kind: CheckKind,
    /// Shell command for `Command` checks; path for `File` checks.
    pub target: String,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub detail: String,
    pub critical: bool,
}

/// Aggregate health: passed / total * 100. An empty result set counts as
/// healthy; callers that want "not verified" check for emptiness first.
pub fn health_score(results: &[CheckResult]) -> u8 {
    if results.is_empty() {
        return 100;
    }
    let passed = results.iter().filter(|r| r.passed).count();
    ((passed * 100) / results.len()) as u8
}
