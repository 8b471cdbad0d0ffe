use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.groundwork/config.toml`.
///
/// **Security**: this struct never stores API keys or tokens. The reasoning
/// section holds the *name* of the env var to read; the provider resolves
/// it at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Load config from `~/.groundwork/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via
    /// type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.safety.validate()?;
        self.execution.validate()?;
        self.reasoning.validate()?;
        self.report.validate()?;
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".groundwork")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Safety-gate settings. Pattern lists are regex source strings compiled by
/// the classifier; order within each list is significant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// When false, every command is approved without classification.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds to wait for an interactive decision before rejecting.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    /// Commands matching any of these always require confirmation.
    #[serde(default = "default_critical_patterns")]
    pub critical_patterns: Vec<String>,
    /// Commands matching any of these are approved without confirmation.
    #[serde(default = "default_auto_approve_patterns")]
    pub auto_approve_patterns: Vec<String>,
    /// First tokens that pass review-tier commands without a prompt.
    #[serde(default = "default_auto_approve_commands")]
    pub auto_approve_commands: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            approval_timeout_secs: default_approval_timeout(),
            critical_patterns: default_critical_patterns(),
            auto_approve_patterns: default_auto_approve_patterns(),
            auto_approve_commands: default_auto_approve_commands(),
        }
    }
}

impl SafetyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.approval_timeout_secs == 0 || self.approval_timeout_secs > 3600 {
            return Err(ConfigError::Validation(
                "safety.approval_timeout_secs must be between 1 and 3600".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_approval_timeout() -> u64 {
    60
}
fn default_critical_patterns() -> Vec<String> {
    [
        r"rm\s+-rf\s+/(\s|$)",
        r"rm\s+-rf\s+~",
        r"rm\s+-rf\s+\*",
        r"sudo\s+rm",
        r"mkfs",
        r"dd\s+if=",
        r">\s*/dev/sd",
        r"chmod\s+-R\s+777\s+/",
        r":\(\)\s*\{",
        r"curl[^|]*\|\s*(ba|z)?sh",
        r"wget[^|]*\|\s*(ba|z)?sh",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_auto_approve_patterns() -> Vec<String> {
    [
        r"^mkdir\b",
        r"^touch\b",
        r"^echo\b",
        r"^export\b",
        r"^cd\b",
        r"^ls\b",
        r"^pwd\b",
        r"^which\b",
        r"--version\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_auto_approve_commands() -> Vec<String> {
    ["mkdir", "cd", "echo", "export", "source"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Fallback per-step timeout when the plan does not estimate one.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// Timeout for provider-suggested recovery commands.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    /// Seconds between terminate and kill when a step overruns.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            recovery_timeout_secs: default_recovery_timeout(),
            grace_period_secs: default_grace_period(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_timeout_secs == 0 || self.step_timeout_secs > 86_400 {
            return Err(ConfigError::Validation(
                "execution.step_timeout_secs must be between 1 and 86400".to_string(),
            ));
        }
        if self.recovery_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "execution.recovery_timeout_secs must not be zero".to_string(),
            ));
        }
        if self.grace_period_secs == 0 {
            return Err(ConfigError::Validation(
                "execution.grace_period_secs must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_step_timeout() -> u64 {
    300
}
fn default_recovery_timeout() -> u64 {
    60
}
fn default_grace_period() -> u64 {
    5
}

/// Reasoning-provider settings – references an env var name, never the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// OpenAI-compatible base URL (e.g. a local inference server).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Env var name holding the API key, resolved at runtime.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Wall-clock timeout for one provider call.
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_reasoning_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ReasoningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "reasoning.base_url must not be empty".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "reasoning.max_tokens must not be zero".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "reasoning.timeout_secs must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434/v1".into()
}
fn default_model() -> String {
    "qwen2.5-coder:14b".into()
}
fn default_api_key_env() -> String {
    "GROUNDWORK_API_KEY".into()
}
fn default_reasoning_timeout() -> u64 {
    120
}
fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory the report stage writes `reports/`, `metrics/` and
    /// `errors/` under.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// `detailed` or `concise`.
    #[serde(default = "default_detail")]
    pub detail: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            detail: default_detail(),
        }
    }
}

impl ReportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let allowed = ["detailed", "concise"];
        if !allowed.contains(&self.detail.as_str()) {
            return Err(ConfigError::Validation(format!(
                "report.detail '{}' is not supported",
                self.detail
            )));
        }
        Ok(())
    }
}

fn default_output_dir() -> String {
    ".".into()
}
fn default_detail() -> String {
    "detailed".into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
