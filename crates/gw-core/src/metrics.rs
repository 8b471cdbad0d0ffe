use crate::types::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// LanguageMetrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

/// One recorded command execution. Long commands are stored truncated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMetric {
    pub command: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// Setup metrics for a single language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageMetrics {
    pub language: Language,
    pub status: LanguageStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commands: Vec<CommandMetric>,
    #[serde(default)]
    pub commands_total: usize,
    #[serde(default)]
    pub commands_failed: usize,
}

impl LanguageMetrics {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            status: LanguageStatus::Pending,
            started_at: None,
            finished_at: None,
            commands: Vec::new(),
            commands_total: 0,
            commands_failed: 0,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = LanguageStatus::InProgress;
    }

    pub fn complete(&mut self, success: bool) {
        self.finished_at = Some(Utc::now());
        self.status = if success {
            LanguageStatus::Success
        } else {
            LanguageStatus::Failed
        };
    }

    pub fn record_command(&mut self, command: &str, success: bool, duration_ms: u64) {
        let command = if command.len() > 100 {
            let mut end = 100;
            while !command.is_char_boundary(end) {
                end -= 1;
            }
            command[..end].to_string()
        } else {
            command.to_string()
        };
        self.commands.push(CommandMetric {
            command,
            success,
            duration_ms,
        });
        self.commands_total += 1;
        if !success {
            self.commands_failed += 1;
        }
    }

    /// Fraction of recorded commands that succeeded, as a percentage.
    /// A language with no recorded commands counts as 100.
    pub fn success_rate(&self) -> f64 {
        if self.commands_total == 0 {
            return 100.0;
        }
        let ok = self.commands_total - self.commands_failed;
        (ok as f64 / self.commands_total as f64) * 100.0
    }

    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }
}

// ---------------------------------------------------------------------------
// MetricsRecorder
// ---------------------------------------------------------------------------

/// Metrics for one run. Owned by the run state; never shared between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecorder {
    pub run_id: String,
    pub project_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub languages: BTreeMap<Language, LanguageMetrics>,
}

impl MetricsRecorder {
    pub fn new(run_id: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            project_name: project_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            languages: BTreeMap::new(),
        }
    }

    /// Per-language metrics, created on first use.
    pub fn language_mut(&mut self, language: Language) -> &mut LanguageMetrics {
        self.languages
            .entry(language)
            .or_insert_with(|| LanguageMetrics::new(language))
    }

    pub fn language(&self, language: Language) -> Option<&LanguageMetrics> {
        self.languages.get(&language)
    }

    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Fraction of attempted languages that finished as `Success`, as a
    /// percentage. Zero languages means a rate of 0.
    pub fn overall_success_rate(&self) -> f64 {
        if self.languages.is_empty() {
            return 0.0;
        }
        let succeeded = self
            .languages
            .values()
            .filter(|m| m.status == LanguageStatus::Success)
            .count();
        (succeeded as f64 / self.languages.len() as f64) * 100.0
    }

    pub fn total_duration_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn succeeded_languages(&self) -> Vec<Language> {
        self.languages
            .iter()
            .filter(|(_, m)| m.status == LanguageStatus::Success)
            .map(|(l, _)| *l)
            .collect()
    }

    pub fn failed_languages(&self) -> Vec<Language> {
        self.languages
            .iter()
            .filter(|(_, m)| m.status == LanguageStatus::Failed)
            .map(|(l, _)| *l)
            .collect()
    }

    /// Export shape consumed by the report stage.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "summary": {
                "run_id": self.run_id,
                "project": self.project_name,
                "total_duration_seconds": self.total_duration_secs(),
                "overall_success_rate": self.overall_success_rate(),
                "languages_attempted": self.languages.len(),
                "languages_succeeded": self.succeeded_languages().len(),
                "languages_failed": self.failed_languages().len(),
            },
            "languages": self.languages,
            "succeeded": self.succeeded_languages(),
            "failed": self.failed_languages(),
            "exported_at": Utc::now(),
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
    fn language_metrics_lifecycle() {
        let mut m = LanguageMetrics::new(Language::NodeJs);
        assert_eq!(m.status, LanguageStatus::Pending);
        assert!(m.duration_secs().is_none());

        m.start();
        assert_eq!(m.status, LanguageStatus::InProgress);
        m.record_command("npm ci", true, 1200);
        m.record_command("npm run build", false, 800);
        m.complete(false);

        assert_eq!(m.status, LanguageStatus::Failed);
        assert_eq!(m.commands_total, 2);
        assert_eq!(m.commands_failed, 1);
        assert!((m.success_rate() - 50.0).abs() < f64::EPSILON);
        assert!(m.duration_secs().is_some());
    }

    #[test]
    fn commands_are_truncated() {
        let mut m = LanguageMetrics::new(Language::Rust);
        let long = "x".repeat(300);
        m.record_command(&long, true, 10);
        assert_eq!(m.commands[0].command.len(), 100);
    }

    #[test]
    fn recorder_creates_language_entries_on_first_use() {
        let mut rec = MetricsRecorder::new("run-1", "demo");
        assert!(rec.language(Language::Golang).is_none());
        rec.language_mut(Language::Golang).start();
        assert!(rec.language(Language::Golang).is_some());
        assert_eq!(rec.languages.len(), 1);
    }

    #[test]
    fn overall_rate_counts_only_successes() {
        let mut rec = MetricsRecorder::new("run-1", "demo");
        rec.language_mut(Language::NodeJs).complete(true);
        rec.language_mut(Language::PythonPip).complete(false);
        rec.language_mut(Language::Rust); // still pending
        assert!((rec.overall_success_rate() - 33.33).abs() < 0.01);
        assert_eq!(rec.succeeded_languages(), vec![Language::NodeJs]);
        assert_eq!(rec.failed_languages(), vec![Language::PythonPip]);

        rec.finalize();
        assert!(rec.finished_at.is_some());
        let json = rec.to_json();
        assert_eq!(json["summary"]["languages_attempted"], 3);
        assert_eq!(json["summary"]["languages_succeeded"], 1);
    }
}
