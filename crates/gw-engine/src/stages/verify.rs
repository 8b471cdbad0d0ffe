//! Verification stage: deterministic post-install health checks. Every
//! language that completed gets its toolchain probed with a real command;
//! the results roll up into the run's health score.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use gw_core::types::{health_score, CheckKind, CheckResult, Language, VerificationCheck};

use crate::shell::{CommandSpawner, ShellOutput, ShellRequest};
use crate::state::RunState;

const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct VerifyStage {
    spawner: Arc<dyn CommandSpawner>,
}

impl VerifyStage {
    pub fn new(spawner: Arc<dyn CommandSpawner>) -> Self {
        Self { spawner }
    }

    /// Probe every completed language. Runs that completed nothing have
    /// nothing to verify and keep their health unset rather than scoring
    /// an empty result set as perfect.
    pub async fn run(&self, mut state: RunState) -> RunState {
        let checks = build_checks(&state);
        if checks.is_empty() {
            tracing::info!("nothing to verify");
            return state;
        }
        tracing::info!(checks = checks.len(), "verifying the installation");

        for check in checks {
            let result = self.execute(&check, &state).await;
            if result.passed {
                tracing::debug!(check = %result.name, "check passed");
            } else {
                tracing::warn!(check = %result.name, detail = %result.detail, "check failed");
            }
            state.verification_results.push(result);
        }

        let score = health_score(&state.verification_results);
        tracing::info!(health = score, "verification finished");
        state.health_score = Some(score);
        state
    }

    async fn execute(&self, check: &VerificationCheck, state: &RunState) -> CheckResult {
        match check.kind {
            CheckKind::Command => self.command_check(check, state).await,
            CheckKind::File => file_check(check, state),
        }
    }

    async fn command_check(&self, check: &VerificationCheck, state: &RunState) -> CheckResult {
        let request = ShellRequest::new(check.target.as_str(), &state.project_path)
            .with_timeout(CHECK_TIMEOUT);
        let output = match self.spawner.run(&request).await {
            Ok(output) => output,
            Err(e) => {
                return CheckResult {
                    check_id: check.id.clone(),
                    name: check.name.clone(),
                    passed: false,
                    detail: format!("could not run: {e}"),
                    critical: check.critical,
                };
            }
        };

        let mut passed = output.success();
        let mut detail = summary_line(&output);
        if passed {
            if let Some(pattern) = &check.expected_output {
                match Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(&output.stdout) && !re.is_match(&output.stderr) {
                            passed = false;
                            detail = format!("output did not match `{pattern}`: {detail}");
                        }
                    }
                    Err(_) => {
                        passed = false;
                        detail = format!("invalid expected pattern `{pattern}`");
                    }
                }
            }
        }

        CheckResult {
            check_id: check.id.clone(),
            name: check.name.clone(),
            passed,
            detail,
            critical: check.critical,
        }
    }
}

fn file_check(check: &VerificationCheck, state: &RunState) -> CheckResult {
    let path = state.project_path.join(&check.target);
    let present = path.exists();
    CheckResult {
        check_id: check.id.clone(),
        name: check.name.clone(),
        passed: present,
        detail: if present {
            format!("{} present", check.target)
        } else {
            format!("{} missing", check.target)
        },
        critical: check.critical,
    }
}

// ---------------------------------------------------------------------------
// Check construction
// ---------------------------------------------------------------------------

fn build_checks(state: &RunState) -> Vec<VerificationCheck> {
    let mut checks = Vec::new();
    let mut seen = HashSet::new();
    for language in &state.completed_languages {
        let (id, name, command) = toolchain_check(*language);
        // python-pip and python-poetry share one interpreter probe
        if seen.insert(command) {
            checks.push(VerificationCheck {
                id: id.to_string(),
                name: name.to_string(),
                kind: CheckKind::Command,
                target: command.to_string(),
                expected_output: None,
                critical: true,
            });
        }
        if *language == Language::NodeJs {
            checks.push(VerificationCheck {
                id: "node-modules".to_string(),
                name: "Dependencies installed".to_string(),
                kind: CheckKind::File,
                target: "node_modules".to_string(),
                expected_output: None,
                critical: false,
            });
        }
    }
    checks
}

fn toolchain_check(language: Language) -> (&'static str, &'static str, &'static str) {
    match language {
        Language::NodeJs => ("node-version", "Node.js runs", "node --version"),
        Language::PythonPip | Language::PythonPoetry => {
            ("python-version", "Python runs", "python3 --version")
        }
        Language::JavaMaven | Language::JavaGradle => ("java-version", "Java runs", "java -version"),
        Language::Ruby => ("ruby-version", "Ruby runs", "ruby --version"),
        Language::Golang => ("go-version", "Go runs", "go version"),
        Language::Rust => ("cargo-version", "Cargo runs", "cargo --version"),
        Language::Docker => ("docker-version", "Docker runs", "docker --version"),
        Language::Make => ("make-version", "Make runs", "make --version"),
    }
}

/// First non-empty line of whichever stream said anything. Version banners
/// land on stdout or stderr depending on the tool (`java -version` uses
/// stderr).
fn summary_line(output: &ShellOutput) -> String {
    let source = if output.stdout.trim().is_empty() {
        &output.stderr
    } else {
        &output.stdout
    };
    source
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{MockSpawner, TokioSpawner};
    use gw_core::types::{Mode, Preferences};

    fn state_at(path: &std::path::Path, completed: &[Language]) -> RunState {
        let mut state = RunState::new(path.to_path_buf(), Mode::Auto, Preferences::default());
        state.completed_languages = completed.to_vec();
        state
    }

    #[tokio::test]
    async fn probes_completed_languages_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        let spawner = Arc::new(MockSpawner::with([MockSpawner::ok(
            "node --version",
            "v20.11.0",
        )]));

        let mut state = state_at(dir.path(), &[Language::NodeJs]);
        state.failed_languages = vec![Language::PythonPip];
        let state = VerifyStage::new(spawner.clone()).run(state).await;

        let commands = spawner.commands();
        assert_eq!(commands, vec!["node --version".to_string()]);
        assert_eq!(state.verification_results.len(), 2);
        assert!(state.verification_results.iter().all(|r| r.passed));
        assert_eq!(state.health_score, Some(100));
        assert_eq!(state.verification_results[0].detail, "v20.11.0");
    }

    #[tokio::test]
    async fn failing_toolchain_fails_its_check() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = Arc::new(MockSpawner::with([MockSpawner::fail(
            "cargo --version",
            "cargo: command not found",
        )]));

        let state = VerifyStage::new(spawner)
            .run(state_at(dir.path(), &[Language::Rust]))
            .await;

        assert_eq!(state.verification_results.len(), 1);
        let result = &state.verification_results[0];
        assert!(!result.passed);
        assert!(result.critical);
        assert_eq!(result.detail, "cargo: command not found");
        assert_eq!(state.health_score, Some(0));
    }

    #[tokio::test]
    async fn nothing_completed_leaves_health_unset() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = Arc::new(MockSpawner::new());

        let state = VerifyStage::new(spawner.clone())
            .run(state_at(dir.path(), &[]))
            .await;

        assert!(state.verification_results.is_empty());
        assert_eq!(state.health_score, None);
        assert!(spawner.commands().is_empty());
    }

    #[tokio::test]
    async fn missing_node_modules_is_a_noncritical_failure() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = Arc::new(MockSpawner::with([MockSpawner::ok(
            "node --version",
            "v20.11.0",
        )]));

        let state = VerifyStage::new(spawner)
            .run(state_at(dir.path(), &[Language::NodeJs]))
            .await;

        let modules = &state.verification_results[1];
        assert!(!modules.passed);
        assert!(!modules.critical);
        assert_eq!(modules.detail, "node_modules missing");
        assert_eq!(state.health_score, Some(50));
    }

    #[tokio::test]
    async fn shared_interpreter_is_probed_once() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = Arc::new(MockSpawner::new());

        let state = VerifyStage::new(spawner.clone())
            .run(state_at(
                dir.path(),
                &[Language::PythonPip, Language::PythonPoetry],
            ))
            .await;

        assert_eq!(spawner.commands().len(), 1);
        assert_eq!(state.verification_results.len(), 1);
    }

    #[tokio::test]
    async fn expected_output_is_matched_against_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = Arc::new(MockSpawner::with([MockSpawner::ok(
            "node --version",
            "v18.19.0",
        )]));
        let stage = VerifyStage::new(spawner);
        let state = state_at(dir.path(), &[]);

        let check = VerificationCheck {
            id: "node-major".to_string(),
            name: "Node 20 installed".to_string(),
            kind: CheckKind::Command,
            target: "node --version".to_string(),
            expected_output: Some(r"v20\.".to_string()),
            critical: true,
        };
        let result = stage.execute(&check, &state).await;
        assert!(!result.passed);
        assert!(result.detail.contains("did not match"));
    }

    #[tokio::test]
    async fn invalid_expected_pattern_fails_the_check() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = Arc::new(MockSpawner::new());
        let stage = VerifyStage::new(spawner);
        let state = state_at(dir.path(), &[]);

        let check = VerificationCheck {
            id: "bad".to_string(),
            name: "Bad pattern".to_string(),
            kind: CheckKind::Command,
            target: "true".to_string(),
            expected_output: Some("(".to_string()),
            critical: false,
        };
        let result = stage.execute(&check, &state).await;
        assert!(!result.passed);
        assert!(result.detail.contains("invalid expected pattern"));
    }

    #[tokio::test]
    async fn spawn_failure_fails_the_check() {
        let state = state_at(std::path::Path::new("/definitely/not/a/real/dir"), &[Language::Make]);

        let state = VerifyStage::new(Arc::new(TokioSpawner::default())).run(state).await;

        let result = &state.verification_results[0];
        assert!(!result.passed);
        assert!(result.detail.contains("could not run"));
        assert_eq!(state.health_score, Some(0));
    }
}
