use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value;

use gw_core::error::SetupError;
use gw_core::types::Language;
use gw_reason::provider::{generate_structured, ReasoningProvider};

use crate::state::RunState;

// ---------------------------------------------------------------------------
// AnalyzeStage
// ---------------------------------------------------------------------------

/// Deep-dives the scan findings: compatibility issues, a recommended
/// installation order, optimizations, and security concerns.
///
/// Everything this stage produces is advisory. A failed consult records a
/// medium-severity error and the pipeline moves on to planning with what
/// the scan alone provides.
pub struct AnalyzeStage {
    provider: Arc<dyn ReasoningProvider>,
}

impl AnalyzeStage {
    pub fn new(provider: Arc<dyn ReasoningProvider>) -> Self {
        Self { provider }
    }

    pub async fn run(&self, mut state: RunState) -> RunState {
        tracing::info!("analyzing dependencies and compatibility");

        let prompt = analysis_prompt(&state);
        let analysis = match generate_structured(self.provider.as_ref(), &prompt).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "dependency analysis unavailable, planning from scan results only");
                state.errors.record(SetupError::from_message(
                    format!("dependency analysis unavailable: {e}"),
                    "analyzer",
                ));
                return state;
            }
        };

        state.compatibility_issues = issue_list(analysis.get("compatibility_issues"));
        state.installation_order =
            language_order(analysis.get("installation_order"), &state.detected_languages);
        state.optimizations = string_list(analysis.get("optimizations"), "suggestion");
        state.security_concerns = issue_list(analysis.get("security_concerns"));

        if state.compatibility_issues.is_empty() {
            tracing::info!("no compatibility issues detected");
        } else {
            tracing::info!(
                count = state.compatibility_issues.len(),
                "compatibility issues found"
            );
            if state
                .compatibility_issues
                .iter()
                .any(|i| i.starts_with("critical"))
            {
                tracing::warn!("critical compatibility issues detected");
            }
        }
        state
    }
}

fn analysis_prompt(state: &RunState) -> String {
    let mut findings = String::new();
    for (language, config) in &state.language_configs {
        let _ = writeln!(findings, "## {language} ({})", config.config_file);
        if let Some(manager) = &config.package_manager {
            let _ = writeln!(findings, "package manager: {manager}");
        }
        if let Some(tool) = &config.build_tool {
            let _ = writeln!(findings, "build tool: {tool}");
        }
        if !config.config_snippet.is_empty() {
            let _ = writeln!(findings, "```\n{}\n```", config.config_snippet);
        }
    }
    let names: Vec<&str> = state.detected_languages.iter().map(|l| l.as_str()).collect();

    format!(
        "Perform a deep analysis of the project dependencies and compatibility.\n\n\
         Project: {project}\n\n\
         Detected languages and configuration files:\n{findings}\n\
         Analyze and respond with a JSON object:\n\
         {{\n\
         \x20 \"compatibility_issues\": [\n\
         \x20   {{\"severity\": \"critical|warning|info\", \"issue\": \"description\", \"solution\": \"recommended fix\"}}\n\
         \x20 ],\n\
         \x20 \"installation_order\": [\"each entry exactly one of: {names}\"],\n\
         \x20 \"optimizations\": [\"suggestion strings\"],\n\
         \x20 \"security_concerns\": [\n\
         \x20   {{\"severity\": \"critical|high|medium|low\", \"component\": \"affected component\", \"issue\": \"description\", \"mitigation\": \"how to mitigate\"}}\n\
         \x20 ]\n\
         }}\n\n\
         Consider version conflicts between the detected toolchains, which\n\
         installations must precede others, and known vulnerabilities in the\n\
         pinned dependencies.",
        project = state.project_name,
        names = names.join(", "),
    )
}

/// Flatten an issue array to display strings. Accepts plain strings or
/// objects shaped like the prompt requests.
fn issue_list(value: Option<&Value>) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items.iter().filter_map(issue_text).collect()
}

fn issue_text(item: &Value) -> Option<String> {
    if let Some(s) = item.as_str() {
        let s = s.trim();
        return (!s.is_empty()).then(|| s.to_string());
    }
    let obj = item.as_object()?;
    let issue = obj.get("issue").and_then(Value::as_str)?;
    let severity = obj.get("severity").and_then(Value::as_str).unwrap_or("info");
    let mut text = match obj.get("component").and_then(Value::as_str) {
        Some(component) => format!("{severity}: [{component}] {issue}"),
        None => format!("{severity}: {issue}"),
    };
    if let Some(fix) = obj
        .get("solution")
        .or_else(|| obj.get("mitigation"))
        .and_then(Value::as_str)
    {
        text.push_str(" (");
        text.push_str(fix);
        text.push(')');
    }
    Some(text)
}

/// Parse the recommended order, dropping anything not actually detected.
fn language_order(value: Option<&Value>, detected: &[Language]) -> Vec<Language> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut order = Vec::new();
    for name in items.iter().filter_map(Value::as_str) {
        let Some(language) = Language::parse(name) else {
            tracing::debug!(name = name, "unknown language in installation order");
            continue;
        };
        if detected.contains(&language) && !order.contains(&language) {
            order.push(language);
        }
    }
    order
}

fn string_list(value: Option<&Value>, key: &str) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            item.as_str()
                .or_else(|| item.get(key).and_then(Value::as_str))
                .map(str::to_string)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::error::Severity;
    use gw_core::types::{LanguageConfig, Mode, Preferences};
    use gw_reason::provider::{ScriptedProvider, StubProvider};

    fn make_state(languages: &[Language]) -> RunState {
        let mut state = RunState::new("/tmp/demo", Mode::Auto, Preferences::default());
        for &language in languages {
            state.detected_languages.push(language);
            state.language_configs.insert(
                language,
                LanguageConfig {
                    config_file: "package.json".to_string(),
                    config_snippet: r#"{"name":"demo","dependencies":{"react":"^18"}}"#.to_string(),
                    package_manager: Some("npm".to_string()),
                    build_tool: None,
                },
            );
        }
        state
    }

    #[tokio::test]
    async fn parses_the_analysis_reply() {
        let provider = Arc::new(ScriptedProvider::new([r#"{
            "compatibility_issues": [
                {"severity": "warning", "issue": "node 18 reaches EOL soon", "solution": "move to node 20"}
            ],
            "installation_order": ["nodejs", "python-pip"],
            "optimizations": [{"suggestion": "use npm ci instead of npm install"}],
            "security_concerns": [
                {"severity": "high", "component": "lodash", "issue": "prototype pollution", "mitigation": "upgrade to 4.17.21"}
            ]
        }"#]));
        let state = AnalyzeStage::new(provider)
            .run(make_state(&[Language::NodeJs, Language::PythonPip]))
            .await;

        assert_eq!(
            state.compatibility_issues,
            vec!["warning: node 18 reaches EOL soon (move to node 20)"]
        );
        assert_eq!(
            state.installation_order,
            vec![Language::NodeJs, Language::PythonPip]
        );
        assert_eq!(state.optimizations, vec!["use npm ci instead of npm install"]);
        assert_eq!(
            state.security_concerns,
            vec!["high: [lodash] prototype pollution (upgrade to 4.17.21)"]
        );
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_records_a_medium_error() {
        let provider = Arc::new(StubProvider::new("offline"));
        let state = AnalyzeStage::new(provider)
            .run(make_state(&[Language::NodeJs]))
            .await;

        assert_eq!(state.errors.len(), 1);
        let error = &state.errors.all()[0];
        assert_eq!(error.source, "analyzer");
        assert_eq!(error.severity, Severity::Medium);
        assert!(state.compatibility_issues.is_empty());
        assert!(state.installation_order.is_empty());
    }

    #[tokio::test]
    async fn undetected_languages_are_dropped_from_the_order() {
        let provider = Arc::new(ScriptedProvider::new([r#"{
            "installation_order": ["rust", "nodejs", "cobol", "nodejs"]
        }"#]));
        let state = AnalyzeStage::new(provider)
            .run(make_state(&[Language::NodeJs]))
            .await;
        assert_eq!(state.installation_order, vec![Language::NodeJs]);
    }

    #[tokio::test]
    async fn plain_string_issues_pass_through() {
        let provider = Arc::new(ScriptedProvider::new([r#"{
            "compatibility_issues": ["two pythons detected", ""],
            "optimizations": ["cache node_modules"]
        }"#]));
        let state = AnalyzeStage::new(provider)
            .run(make_state(&[Language::NodeJs]))
            .await;
        assert_eq!(state.compatibility_issues, vec!["two pythons detected"]);
        assert_eq!(state.optimizations, vec!["cache node_modules"]);
    }

    #[tokio::test]
    async fn prompt_carries_the_scan_findings() {
        let provider = Arc::new(ScriptedProvider::new(["{}"]));
        let _ = AnalyzeStage::new(provider.clone())
            .run(make_state(&[Language::NodeJs]))
            .await;

        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("nodejs (package.json)"));
        assert!(prompt.contains("package manager: npm"));
        assert!(prompt.contains(r#""react":"^18""#));
    }
}
