use gw_core::config::SafetyConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, SafetyError>;

#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("invalid safety pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
}

// ---------------------------------------------------------------------------
// Risk tiers
// ---------------------------------------------------------------------------

/// How a command is gated before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Runs without confirmation.
    Safe,
    /// May run unprompted when the command is on the benign-prefix list.
    Review,
    /// Always requires an explicit decision.
    Critical,
}

/// A command plus everything the approval prompt needs to show about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInfo {
    pub command: String,
    pub description: String,
    pub tier: RiskTier,
    pub risks: Vec<String>,
}

/// Outcome of gating one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub approved: bool,
    /// True when no human was consulted.
    pub auto: bool,
    /// Replacement command when the user edited it at the prompt.
    pub modified_command: Option<String>,
    pub reason: Option<String>,
}

impl SafetyDecision {
    pub fn approved_auto(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            auto: true,
            modified_command: None,
            reason: Some(reason.into()),
        }
    }

    pub fn rejected(auto: bool, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            auto,
            modified_command: None,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionClassifier
// ---------------------------------------------------------------------------

/// Classifies commands against the configured pattern lists.
///
/// Patterns are compiled once at construction; list order is the match
/// order, and critical patterns win over auto-approve ones. Classification
/// reads nothing but the command, so the same input always yields the same
/// tier.
pub struct ActionClassifier {
    critical: Vec<Regex>,
    auto_approve: Vec<Regex>,
}

impl ActionClassifier {
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        Ok(Self {
            critical: compile_all(&config.critical_patterns)?,
            auto_approve: compile_all(&config.auto_approve_patterns)?,
        })
    }

    pub fn classify(&self, command: &str) -> RiskTier {
        if self.critical.iter().any(|p| p.is_match(command)) {
            return RiskTier::Critical;
        }
        if self.auto_approve.iter().any(|p| p.is_match(command)) {
            return RiskTier::Safe;
        }
        RiskTier::Review
    }

    /// Classify and annotate a command in one pass.
    pub fn assess(&self, command: impl Into<String>, description: impl Into<String>) -> ActionInfo {
        let command = command.into();
        let tier = self.classify(&command);
        let risks = analyze_risks(&command);
        ActionInfo {
            command,
            description: description.into(),
            tier,
            risks,
        }
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| SafetyError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Substring heuristics for the risk annotations shown at the prompt.
pub fn analyze_risks(command: &str) -> Vec<String> {
    let mut risks = Vec::new();
    if command.contains("sudo") {
        risks.push("Requires system-level permissions".to_string());
    }
    if command.contains("rm") && command.contains("-r") {
        risks.push("Deletes files/directories recursively".to_string());
    }
    if command.contains('|') && command.contains("sh") {
        risks.push("Executes downloaded content directly".to_string());
    }
    if command.contains("chmod 777") {
        risks.push("Makes files world-writable (security risk)".to_string());
    }
    if command.contains("curl") || command.contains("wget") {
        risks.push("Downloads content from internet".to_string());
    }
    risks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
