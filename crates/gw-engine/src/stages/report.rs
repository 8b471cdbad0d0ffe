//! Report stage: renders the run into markdown and persists the report,
//! metrics and error artifacts. Every run ends here, whatever happened
//! before, so nothing in this stage is allowed to fail the workflow. A
//! write that goes wrong costs the artifact, not the report.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use gw_core::config::ReportConfig;
use gw_core::metrics::{LanguageMetrics, LanguageStatus};

use crate::state::RunState;

use super::format_duration;

pub struct ReportStage {
    config: ReportConfig,
}

impl ReportStage {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, mut state: RunState) -> RunState {
        state.metrics.finalize();
        state.finished_at = Some(Utc::now());

        let status = run_status(&state);
        let report = if state.preferences.fast_mode || self.config.detail == "concise" {
            concise_report(&state, status)
        } else {
            detailed_report(&state, status)
        };

        tracing::info!(
            status,
            duration = %format_duration(state.metrics.total_duration_secs().round() as u64),
            "run finished"
        );

        self.persist(&mut state, &report);
        state.report = Some(report);
        state
    }

    fn persist(&self, state: &mut RunState, report: &str) {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let slug = filename_slug(&state.project_name);
        let base = Path::new(&self.config.output_dir);

        state.report_path = write_artifact(
            &base.join("reports"),
            &format!("setup_{slug}_{stamp}.md"),
            report,
        );
        write_artifact(
            &base.join("metrics"),
            &format!("setup_metrics_{stamp}.json"),
            &pretty(&state.metrics.to_json()),
        );
        if !state.errors.is_empty() {
            write_artifact(
                &base.join("errors"),
                &format!("setup_errors_{stamp}.json"),
                &pretty(&state.errors.to_json()),
            );
        }
    }
}

fn write_artifact(dir: &Path, name: &str, content: &str) -> Option<PathBuf> {
    if let Err(e) = fs::create_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "could not create the artifact directory");
        return None;
    }
    let path = dir.join(name);
    match fs::write(&path, content) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "artifact written");
            Some(path)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not write the artifact");
            None
        }
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn filename_slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// One-word verdict for the whole run.
fn run_status(state: &RunState) -> &'static str {
    if state.user_cancelled {
        return "cancelled";
    }
    if state.fatal_error.is_some() || state.errors.has_critical() {
        return "failed";
    }
    if !state.failed_languages.is_empty() && state.completed_languages.is_empty() {
        return "failed";
    }
    if !state.failed_languages.is_empty() || !state.failed_steps.is_empty() {
        return "partial";
    }
    // languages were detected but nothing ever executed: the run never got
    // past planning
    if !state.detected_languages.is_empty() && state.execution_results.is_empty() {
        return "incomplete";
    }
    "complete"
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn detailed_report(state: &RunState, status: &str) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Setup Report: {}", state.project_name);
    let _ = writeln!(md);
    let _ = writeln!(md, "Status: {status}");
    let _ = writeln!(md, "- Run: {}", state.run_id);
    let _ = writeln!(md, "- Mode: {}", state.mode.as_str());
    let _ = writeln!(md, "- Approach: {}", state.workflow_path.as_str());
    let _ = writeln!(
        md,
        "- Duration: {}",
        format_duration(state.metrics.total_duration_secs().round() as u64)
    );
    if let Some(health) = state.health_score {
        let _ = writeln!(md, "- Health: {health}%");
    }
    if !state.metrics.languages.is_empty() {
        let _ = writeln!(
            md,
            "- Language success rate: {:.0}%",
            state.metrics.overall_success_rate()
        );
    }

    if state.detected_languages.is_empty() {
        let _ = writeln!(md);
        let _ = writeln!(
            md,
            "No supported configuration files were found in {}.",
            state.project_path.display()
        );
    }

    if !state.metrics.languages.is_empty() {
        let _ = writeln!(md);
        let _ = writeln!(md, "## Languages");
        let _ = writeln!(md);
        for metrics in state.metrics.languages.values() {
            let _ = writeln!(md, "- {}", language_line(metrics));
        }
    }

    if !state.verification_results.is_empty() {
        let _ = writeln!(md);
        let _ = writeln!(md, "## Verification");
        let _ = writeln!(md);
        for result in &state.verification_results {
            let verdict = if result.passed { "PASS" } else { "FAIL" };
            let mut line = format!("- {verdict} {}", result.name);
            if !result.detail.is_empty() {
                let _ = write!(line, ": {}", result.detail);
            }
            if !result.passed && result.critical {
                line.push_str(" [critical]");
            }
            let _ = writeln!(md, "{line}");
        }
    }

    if !state.failed_steps.is_empty() {
        let _ = writeln!(md);
        let _ = writeln!(md, "## Failed steps");
        let _ = writeln!(md);
        for step_id in &state.failed_steps {
            let error = state
                .execution_results
                .iter()
                .rev()
                .find(|r| &r.step_id == step_id)
                .and_then(|r| r.error.as_deref())
                .unwrap_or("no error captured");
            let _ = writeln!(md, "- {step_id}: {error}");
        }
    }

    if !state.errors.is_empty() {
        let _ = writeln!(md);
        let _ = writeln!(md, "## Issues");
        let _ = writeln!(md);
        for error in state.errors.all() {
            let _ = writeln!(
                md,
                "- [{}] {}: {}",
                error.severity.as_str(),
                error.source,
                error.message
            );
        }
    }

    if let Some(plan) = &state.plan {
        if !plan.notes.is_empty() {
            let _ = writeln!(md);
            let _ = writeln!(md, "## Notes");
            let _ = writeln!(md);
            for note in &plan.notes {
                let _ = writeln!(md, "- {note}");
            }
        }
    }

    let _ = writeln!(md);
    let _ = writeln!(md, "## Next steps");
    let _ = writeln!(md);
    for line in next_steps(state, status) {
        let _ = writeln!(md, "- {line}");
    }

    md
}

fn concise_report(state: &RunState, status: &str) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Setup: {}", state.project_name);
    let _ = writeln!(md);

    if !state.metrics.languages.is_empty() {
        let parts: Vec<String> = state
            .metrics
            .languages
            .values()
            .map(|m| format!("{} {}", m.language, status_word(m.status)))
            .collect();
        let _ = writeln!(md, "Languages: {}", parts.join(", "));
    } else if state.detected_languages.is_empty() {
        let _ = writeln!(md, "No supported configuration files were found.");
    }

    let mut footer = format!(
        "Status: {status} | Time: {}",
        format_duration(state.metrics.total_duration_secs().round() as u64)
    );
    if let Some(health) = state.health_score {
        let _ = write!(footer, " | Health: {health}%");
    }
    let _ = writeln!(md, "{footer}");
    md
}

fn language_line(metrics: &LanguageMetrics) -> String {
    let mut line = format!("{}: {}", metrics.language, status_word(metrics.status));
    if metrics.commands_total > 0 {
        let ok = metrics.commands_total - metrics.commands_failed;
        let _ = write!(line, ", {}/{} commands succeeded", ok, metrics.commands_total);
    }
    if let Some(secs) = metrics.duration_secs() {
        let _ = write!(line, ", {}", format_duration(secs.round() as u64));
    }
    line
}

fn status_word(status: LanguageStatus) -> &'static str {
    match status {
        LanguageStatus::Pending => "pending",
        LanguageStatus::InProgress => "in progress",
        LanguageStatus::Success => "success",
        LanguageStatus::Failed => "failed",
    }
}

fn next_steps(state: &RunState, status: &str) -> Vec<String> {
    match status {
        "cancelled" => vec![
            "The run was stopped before finishing; partial work may remain.".to_string(),
            "Re-run `gw run` to start over.".to_string(),
        ],
        "failed" => vec![
            "Review the issues above, then re-run `gw run`.".to_string(),
            "The error export under errors/ carries full details.".to_string(),
        ],
        "partial" => {
            let mut steps = vec![format!(
                "Setup finished for: {}.",
                join_languages(&state.completed_languages)
            )];
            if !state.failed_languages.is_empty() {
                steps.push(format!(
                    "Fix the failures for {} and re-run `gw run`.",
                    join_languages(&state.failed_languages)
                ));
            } else {
                steps.push("Fix the failed steps above and re-run `gw run`.".to_string());
            }
            steps
        }
        "incomplete" => vec![
            "No commands were executed.".to_string(),
            "Address the issues above and re-run `gw run`.".to_string(),
        ],
        _ if state.detected_languages.is_empty() => vec![
            "Nothing to set up; add a supported configuration file and re-run.".to_string(),
        ],
        _ => {
            let mut steps = vec!["The environment is installed and verified.".to_string()];
            if state.health_score.is_some_and(|h| h < 100) {
                steps.push("Some non-blocking checks failed; see Verification above.".to_string());
            }
            steps
        }
    }
}

fn join_languages(languages: &[gw_core::types::Language]) -> String {
    let names: Vec<&str> = languages.iter().map(|l| l.as_str()).collect();
    names.join(", ")
}

// ---------------------------------------------------------------------------
