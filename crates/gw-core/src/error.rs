use crate::types::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Standardized failure classification across every pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Language / platform
    UnsupportedLanguage,
    LanguageNotFound,
    // Installation
    InstallationFailed,
    DependencyConflict,
    VersionMismatch,
    PackageNotFound,
    // System
    PermissionDenied,
    InsufficientSpace,
    PathNotFound,
    // Network
    NetworkError,
    DownloadFailed,
    RegistryUnreachable,
    // Execution
    Timeout,
    CommandFailed,
    InvalidConfig,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedLanguage => "unsupported_language",
            ErrorKind::LanguageNotFound => "language_not_found",
            ErrorKind::InstallationFailed => "installation_failed",
            ErrorKind::DependencyConflict => "dependency_conflict",
            ErrorKind::VersionMismatch => "version_mismatch",
            ErrorKind::PackageNotFound => "package_not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InsufficientSpace => "insufficient_space",
            ErrorKind::PathNotFound => "path_not_found",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::DownloadFailed => "download_failed",
            ErrorKind::RegistryUnreachable => "registry_unreachable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CommandFailed => "command_failed",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Classify a raw failure message by keyword. Order matters: the first
    /// matching family wins.
    pub fn classify_message(message: &str) -> Self {
        let msg = message.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| msg.contains(w));

        if has(&["permission", "access denied", "eacces", "unauthorized"]) {
            ErrorKind::PermissionDenied
        } else if has(&["network", "connection", "fetch"]) {
            ErrorKind::NetworkError
        } else if msg.contains("timeout") || msg.contains("timed out") {
            ErrorKind::Timeout
        } else if has(&["not found", "cannot find", "missing"]) {
            ErrorKind::PackageNotFound
        } else if has(&["disk", "no space"]) {
            ErrorKind::InsufficientSpace
        } else if has(&["install", "setup"]) {
            ErrorKind::InstallationFailed
        } else {
            ErrorKind::Unknown
        }
    }
}

/// How far a failure propagates: Critical ends the run, High ends the
/// current language, Medium is retryable, Low is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Default severity for a kind when the recording site does not know
    /// better. Unmapped kinds land on Medium.
    pub fn default_for(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::UnsupportedLanguage => Severity::Critical,
            ErrorKind::PermissionDenied | ErrorKind::InstallationFailed => Severity::High,
            ErrorKind::VersionMismatch => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

// ---------------------------------------------------------------------------
// SetupError
// ---------------------------------------------------------------------------

/// One recorded failure. Constructed once, appended to the tracker, never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    /// Component that recorded the error (stage or handler name).
    pub source: String,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl SetupError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::default_for(kind),
            message: message.into(),
            source: source.into(),
            language: None,
            command: None,
            details: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Classify a raw message and build the error in one call.
    pub fn from_message(message: impl Into<String>, source: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::classify_message(&message), message, source)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// ErrorTracker
// ---------------------------------------------------------------------------

/// Aggregated counts over everything a tracker has recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_language: BTreeMap<String, usize>,
    pub has_critical: bool,
}

/// Append-only error log for a single run. Owned by the run state; two
/// concurrent runs never share one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorTracker {
    errors: Vec<SetupError>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, error: SetupError) {
        tracing::debug!(
            kind = error.kind.as_str(),
            severity = error.severity.as_str(),
            source = %error.source,
            "error recorded"
        );
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn all(&self) -> &[SetupError] {
        &self.errors
    }

    pub fn by_kind(&self, kind: ErrorKind) -> Vec<&SetupError> {
        self.errors.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn by_severity(&self, severity: Severity) -> Vec<&SetupError> {
        self.errors.iter().filter(|e| e.severity == severity).collect()
    }

    pub fn by_language(&self, language: Language) -> Vec<&SetupError> {
        self.errors
            .iter()
            .filter(|e| e.language == Some(language))
            .collect()
    }

    pub fn has_critical(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Critical)
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut summary = ErrorSummary {
            total: self.errors.len(),
            has_critical: self.has_critical(),
            ..Default::default()
        };
        for error in &self.errors {
            *summary.by_kind.entry(error.kind.as_str().to_string()).or_default() += 1;
            *summary
                .by_severity
                .entry(error.severity.as_str().to_string())
                .or_default() += 1;
            if let Some(lang) = error.language {
                *summary.by_language.entry(lang.to_string()).or_default() += 1;
            }
        }
        summary
    }

    /// Full export: every recorded error plus the summary, for reports.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "errors": self.errors,
            "summary": self.summary(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_severity_mapping() {
        assert_eq!(
            Severity::default_for(ErrorKind::UnsupportedLanguage),
            Severity::Critical
        );
        assert_eq!(Severity::default_for(ErrorKind::PermissionDenied), Severity::High);
        assert_eq!(Severity::default_for(ErrorKind::InstallationFailed), Severity::High);
        assert_eq!(Severity::default_for(ErrorKind::VersionMismatch), Severity::Low);
        assert_eq!(Severity::default_for(ErrorKind::NetworkError), Severity::Medium);
        assert_eq!(Severity::default_for(ErrorKind::Timeout), Severity::Medium);
        assert_eq!(Severity::default_for(ErrorKind::CommandFailed), Severity::Medium);
        assert_eq!(Severity::default_for(ErrorKind::Unknown), Severity::Medium);
    }

    #[test]
    fn classify_message_keywords() {
        assert_eq!(
            ErrorKind::classify_message("EACCES: permission denied"),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            ErrorKind::classify_message("connection refused by registry"),
            ErrorKind::NetworkError
        );
        assert_eq!(
            ErrorKind::classify_message("command timed out after 300s"),
            ErrorKind::Timeout
        );
        assert_eq!(
            ErrorKind::classify_message("package left-pad not found"),
            ErrorKind::PackageNotFound
        );
        assert_eq!(
            ErrorKind::classify_message("no space left on device"),
            ErrorKind::InsufficientSpace
        );
        assert_eq!(ErrorKind::classify_message("exit status 2"), ErrorKind::Unknown);
    }

    #[test]
    fn tracker_aggregates_counts() {
        let mut tracker = ErrorTracker::new();
        tracker.record(
            SetupError::new(ErrorKind::UnsupportedLanguage, "no handler", "queue")
                .with_severity(Severity::Critical),
        );
        tracker.record(SetupError::new(ErrorKind::NetworkError, "registry down", "node"));
        tracker.record(SetupError::new(ErrorKind::Timeout, "npm install timed out", "node"));

        assert!(tracker.has_critical());
        let summary = tracker.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_severity.get("critical"), Some(&1));
        assert_eq!(summary.by_severity.get("medium"), Some(&2));
        assert!(summary.has_critical);
    }

    #[test]
    fn tracker_filters_by_language() {
        let mut tracker = ErrorTracker::new();
        tracker.record(
            SetupError::new(ErrorKind::CommandFailed, "npm ci failed", "node")
                .with_language(Language::NodeJs),
        );
        tracker.record(
            SetupError::new(ErrorKind::CommandFailed, "pip failed", "python")
                .with_language(Language::PythonPip),
        );
        tracker.record(SetupError::new(ErrorKind::InvalidConfig, "bad toml", "config"));

        assert_eq!(tracker.by_language(Language::NodeJs).len(), 1);
        assert_eq!(tracker.by_kind(ErrorKind::CommandFailed).len(), 2);
        assert_eq!(tracker.len(), 3);
        let summary = tracker.summary();
        assert_eq!(summary.by_language.get("nodejs"), Some(&1));
        assert_eq!(summary.by_language.get("python-pip"), Some(&1));
    }
}
