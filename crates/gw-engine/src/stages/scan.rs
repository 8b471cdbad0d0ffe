use std::path::Path;

use gw_core::types::{Language, LanguageConfig};

use crate::state::RunState;

/// Signature files the scanner recognizes, checked in this order. The
/// order matters downstream: it breaks priority ties in the execution
/// queue.
const SIGNATURES: &[(&str, Language)] = &[
    ("package.json", Language::NodeJs),
    ("requirements.txt", Language::PythonPip),
    ("pyproject.toml", Language::PythonPoetry),
    ("pom.xml", Language::JavaMaven),
    ("build.gradle", Language::JavaGradle),
    ("Gemfile", Language::Ruby),
    ("go.mod", Language::Golang),
    ("Cargo.toml", Language::Rust),
    ("Dockerfile", Language::Docker),
    ("Makefile", Language::Make),
];

/// How much of each config file is kept for analysis prompts.
const SNIPPET_CHARS: usize = 1000;

// ---------------------------------------------------------------------------
// ScanStage
// ---------------------------------------------------------------------------

/// Detects project ecosystems by their config-file signatures and seeds
/// the execution queue.
///
/// Detection is purely filesystem-driven: a signature file in the project
/// root means the language is present. The same tree always scans to the
/// same result.
pub struct ScanStage;

impl ScanStage {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, mut state: RunState) -> RunState {
        tracing::info!(path = %state.project_path.display(), "scanning project");

        for &(file, language) in SIGNATURES {
            let path = state.project_path.join(file);
            if !path.is_file() {
                continue;
            }
            let snippet = read_snippet(&path);
            let config = LanguageConfig {
                config_file: file.to_string(),
                config_snippet: snippet,
                package_manager: package_manager_hint(language, &state.project_path),
                build_tool: build_tool_hint(language),
            };
            tracing::debug!(language = %language, file = file, "signature matched");
            state.detected_languages.push(language);
            state.language_configs.insert(language, config);
        }

        state.execution_queue = state.detected_languages.clone();
        state.update_queue_flags();

        if state.detected_languages.is_empty() {
            tracing::info!("no known project signatures found");
        } else {
            tracing::info!(
                count = state.detected_languages.len(),
                languages = ?state.detected_languages,
                "languages detected"
            );
        }
        state
    }
}

impl Default for ScanStage {
    fn default() -> Self {
        Self::new()
    }
}

fn read_snippet(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content.chars().take(SNIPPET_CHARS).collect(),
        Err(e) => {
            // the signature still counts; the prompt just loses its snippet
            tracing::warn!(path = %path.display(), error = %e, "config file unreadable");
            String::new()
        }
    }
}

fn package_manager_hint(language: Language, project: &Path) -> Option<String> {
    match language {
        Language::NodeJs => {
            let manager = if project.join("yarn.lock").is_file() {
                "yarn"
            } else {
                "npm"
            };
            Some(manager.to_string())
        }
        Language::PythonPip => Some("pip".to_string()),
        Language::PythonPoetry => Some("poetry".to_string()),
        _ => None,
    }
}

fn build_tool_hint(language: Language) -> Option<String> {
    match language {
        Language::JavaMaven => Some("maven".to_string()),
        Language::JavaGradle => Some("gradle".to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
