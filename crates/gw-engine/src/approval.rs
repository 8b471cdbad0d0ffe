use crate::safety::{ActionInfo, RiskTier, SafetyDecision};
use chrono::{DateTime, Utc};
use gw_core::config::SafetyConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Prompt seam
// ---------------------------------------------------------------------------

/// What the human answered at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approve,
    Reject,
    /// Approve, but run this command instead.
    Edit(String),
    /// Abandon the whole run.
    Quit,
}

/// Interactive decision source. Production reads stdin; tests inject
/// queued answers.
#[async_trait::async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn ask(&self, action: &ActionInfo) -> std::io::Result<ApprovalResponse>;

    /// Review a whole installation plan before anything runs. `summary` is
    /// the short form, `details` the full step listing shown on request.
    /// Prompts that have no terminal accept the plan.
    async fn review_plan(
        &self,
        summary: &str,
        details: &str,
    ) -> std::io::Result<ApprovalResponse> {
        let _ = (summary, details);
        Ok(ApprovalResponse::Approve)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("run aborted at the approval prompt")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, GateError>;

// ---------------------------------------------------------------------------
// Decision records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// One gated action, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub command: String,
    pub tier: RiskTier,
    pub status: ApprovalStatus,
    /// True when no human was consulted.
    pub auto: bool,
    pub modified_command: Option<String>,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ApprovalGate
// ---------------------------------------------------------------------------

/// Gates every command between classification and execution.
///
/// Safe actions pass, critical actions always go to the prompt, and
/// review-tier actions pass only when their first token is on the benign
/// command list. An unanswered prompt REJECTS after the configured timeout;
/// silence never approves anything.
pub struct ApprovalGate {
    config: SafetyConfig,
    prompt: Arc<dyn ApprovalPrompt>,
    decisions: Vec<ApprovalRecord>,
}

impl ApprovalGate {
    pub fn new(config: SafetyConfig, prompt: Arc<dyn ApprovalPrompt>) -> Self {
        Self {
            config,
            prompt,
            decisions: Vec::new(),
        }
    }

    /// Decide whether `action` may run.
    ///
    /// Returns `Err(GateError::Aborted)` only when the user quit; every
    /// other outcome (including prompt timeout and prompt I/O failure) is an
    /// ordinary decision.
    pub async fn check_action(&mut self, action: &ActionInfo) -> Result<SafetyDecision> {
        if !self.config.enabled {
            let decision = SafetyDecision::approved_auto("safety gate disabled");
            self.record(action, ApprovalStatus::Approved, &decision);
            return Ok(decision);
        }

        match action.tier {
            RiskTier::Safe => {
                let decision = SafetyDecision::approved_auto("auto-approved safe command");
                self.record(action, ApprovalStatus::Approved, &decision);
                Ok(decision)
            }
            RiskTier::Review if self.is_benign_prefix(&action.command) => {
                let decision = SafetyDecision::approved_auto("auto-approved after review");
                self.record(action, ApprovalStatus::Approved, &decision);
                Ok(decision)
            }
            RiskTier::Review | RiskTier::Critical => self.ask_human(action).await,
        }
    }

    /// All decisions made so far, newest last.
    pub fn decisions(&self) -> &[ApprovalRecord] {
        &self.decisions
    }

    fn is_benign_prefix(&self, command: &str) -> bool {
        let Some(first) = command.split_whitespace().next() else {
            return false;
        };
        self.config.auto_approve_commands.iter().any(|c| c == first)
    }

    async fn ask_human(&mut self, action: &ActionInfo) -> Result<SafetyDecision> {
        let idx = self.push_pending(action);
        let budget = Duration::from_secs(self.config.approval_timeout_secs);

        let response = match tokio::time::timeout(budget, self.prompt.ask(action)).await {
            Err(_) => {
                tracing::warn!(
                    command = %action.command,
                    timeout_secs = self.config.approval_timeout_secs,
                    "no approval decision in time, rejecting"
                );
                let decision = SafetyDecision::rejected(false, "approval timed out");
                self.resolve(idx, ApprovalStatus::Rejected, &decision);
                return Ok(decision);
            }
            Ok(Err(e)) => {
                let decision =
                    SafetyDecision::rejected(false, format!("approval prompt failed: {e}"));
                self.resolve(idx, ApprovalStatus::Rejected, &decision);
                return Ok(decision);
            }
            Ok(Ok(response)) => response,
        };

        match response {
            ApprovalResponse::Approve => {
                let decision = SafetyDecision {
                    approved: true,
                    auto: false,
                    modified_command: None,
                    reason: None,
                };
                self.resolve(idx, ApprovalStatus::Approved, &decision);
                Ok(decision)
            }
            ApprovalResponse::Reject => {
                let decision = SafetyDecision::rejected(false, "user skipped");
                self.resolve(idx, ApprovalStatus::Rejected, &decision);
                Ok(decision)
            }
            ApprovalResponse::Edit(command) => {
                let decision = SafetyDecision {
                    approved: true,
                    auto: false,
                    modified_command: Some(command),
                    reason: Some("user edited command".to_string()),
                };
                self.resolve(idx, ApprovalStatus::Approved, &decision);
                Ok(decision)
            }
            ApprovalResponse::Quit => {
                let decision = SafetyDecision::rejected(false, "user quit");
                self.resolve(idx, ApprovalStatus::Rejected, &decision);
                Err(GateError::Aborted)
            }
        }
    }

    fn record(&mut self, action: &ActionInfo, status: ApprovalStatus, decision: &SafetyDecision) {
        self.decisions.push(ApprovalRecord {
            id: Uuid::new_v4(),
            command: action.command.clone(),
            tier: action.tier,
            status,
            auto: decision.auto,
            modified_command: decision.modified_command.clone(),
            reason: decision.reason.clone(),
            requested_at: Utc::now(),
            resolved_at: Some(Utc::now()),
        });
    }

    fn push_pending(&mut self, action: &ActionInfo) -> usize {
        self.decisions.push(ApprovalRecord {
            id: Uuid::new_v4(),
            command: action.command.clone(),
            tier: action.tier,
            status: ApprovalStatus::Pending,
            auto: false,
            modified_command: None,
            reason: None,
            requested_at: Utc::now(),
            resolved_at: None,
        });
        self.decisions.len() - 1
    }

    fn resolve(&mut self, idx: usize, status: ApprovalStatus, decision: &SafetyDecision) {
        let Some(record) = self.decisions.get_mut(idx) else {
            return;
        };
        if record.status != ApprovalStatus::Pending {
            return;
        }
        record.status = status;
        record.auto = decision.auto;
        record.modified_command = decision.modified_command.clone();
        record.reason = decision.reason.clone();
        record.resolved_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// StdinPrompt – production prompt on the terminal
// ---------------------------------------------------------------------------

/// Reads y/n/e/q decisions from stdin.
pub struct StdinPrompt;

#[async_trait::async_trait]
impl ApprovalPrompt for StdinPrompt {
    async fn ask(&self, action: &ActionInfo) -> std::io::Result<ApprovalResponse> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        println!();
        println!("{}", "=".repeat(60));
        println!("APPROVAL REQUIRED");
        println!("{}", "=".repeat(60));
        println!("Command: {}", action.command);
        println!("Purpose: {}", action.description);
        if !action.risks.is_empty() {
            println!();
            println!("Potential risks:");
            for risk in &action.risks {
                println!("  - {risk}");
            }
        }
        println!();
        println!("  [y] Approve and continue");
        println!("  [n] Skip this step");
        println!("  [e] Edit command");
        println!("  [q] Quit");
        println!();
        println!("Your choice [y/n/e/q]:");

        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        match line.trim().to_lowercase().as_str() {
            "y" => Ok(ApprovalResponse::Approve),
            "e" => {
                println!("Enter modified command:");
                let mut edited = String::new();
                reader.read_line(&mut edited).await?;
                Ok(ApprovalResponse::Edit(edited.trim().to_string()))
            }
            "q" => Ok(ApprovalResponse::Quit),
            _ => Ok(ApprovalResponse::Reject),
        }
    }

    async fn review_plan(
        &self,
        summary: &str,
        details: &str,
    ) -> std::io::Result<ApprovalResponse> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        println!();
        println!("{}", "=".repeat(60));
        println!("INSTALLATION PLAN");
        println!("{}", "=".repeat(60));
        println!("{summary}");
        println!();
        println!("  [y] Approve and execute");
        println!("  [n] Reject the plan");
        println!("  [d] Show the full plan");
        println!("  [q] Quit");

        let mut reader = BufReader::new(tokio::io::stdin());
        loop {
            println!();
            println!("Your choice [y/n/d/q]:");
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            match line.trim().to_lowercase().as_str() {
                "y" => return Ok(ApprovalResponse::Approve),
                "d" => println!("{details}"),
                "q" => return Ok(ApprovalResponse::Quit),
                _ => return Ok(ApprovalResponse::Reject),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// QueuedPrompt – canned answers for tests
// ---------------------------------------------------------------------------

/// Test double answering from a queue. An exhausted queue never answers,
/// which is how tests exercise the timeout path.
#[derive(Default)]
pub struct QueuedPrompt {
    responses: std::sync::Mutex<std::collections::VecDeque<ApprovalResponse>>,
    asked: std::sync::Mutex<Vec<String>>,
}

impl QueuedPrompt {
    pub fn new(responses: impl IntoIterator<Item = ApprovalResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().collect()),
            asked: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Commands the gate asked about, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl ApprovalPrompt for QueuedPrompt {
    async fn ask(&self, action: &ActionInfo) -> std::io::Result<ApprovalResponse> {
        self.asked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action.command.clone());
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(response) => Ok(response),
            // nobody at the terminal; let the gate's timeout decide
            None => std::future::pending().await,
        }
    }

    async fn review_plan(
        &self,
        _summary: &str,
        _details: &str,
    ) -> std::io::Result<ApprovalResponse> {
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(response) => Ok(response),
            None => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
