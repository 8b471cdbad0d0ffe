use gw_core::types::{Language, Step};

use super::{any_step_failed, complete_language, fail_language, probe, SharedRunner};
use crate::queue::LanguageHandler;
use crate::state::RunState;

/// Python setup shared by the pip and poetry variants: interpreter check,
/// OS-conditional install, a project virtualenv for pip projects, then the
/// dependency install that matches the detected manifest.
pub struct PythonHandler {
    language: Language,
    runner: SharedRunner,
}

impl PythonHandler {
    /// Variant for projects driven by `requirements.txt`.
    pub fn pip(runner: SharedRunner) -> Self {
        Self {
            language: Language::PythonPip,
            runner,
        }
    }

    /// Variant for projects driven by a poetry lockfile.
    pub fn poetry(runner: SharedRunner) -> Self {
        Self {
            language: Language::PythonPoetry,
            runner,
        }
    }

    fn slug(&self) -> String {
        self.language.as_str().replace('-', "_")
    }

    fn install_steps(&self) -> Vec<Step> {
        let slug = self.slug();
        if cfg!(target_os = "windows") {
            vec![Step::new(
                format!("{slug}_install"),
                "Install Python",
                "winget install Python.Python.3.11 --accept-package-agreements --accept-source-agreements",
            )
            .with_language(self.language)
            .with_timeout_secs(300)]
        } else {
            vec![
                Step::new(
                    format!("{slug}_apt_update"),
                    "Refresh package index",
                    "sudo apt-get update",
                )
                .with_language(self.language)
                .with_timeout_secs(300)
                .with_sudo(true),
                Step::new(
                    format!("{slug}_install"),
                    "Install Python",
                    "sudo apt-get install -y python3 python3-pip python3-venv",
                )
                .with_language(self.language)
                .with_timeout_secs(300)
                .with_sudo(true),
            ]
        }
    }

    async fn install_requirements(&self, state: &mut RunState) -> bool {
        // prefer the project venv's pip when one exists
        let pip = if state.project_path.join("venv").exists() {
            if cfg!(target_os = "windows") {
                r"venv\Scripts\pip".to_string()
            } else {
                "venv/bin/pip".to_string()
            }
        } else {
            "python3 -m pip".to_string()
        };
        let deps = Step::new(
            format!("{}_deps", self.slug()),
            "Install requirements",
            format!("{pip} install -r requirements.txt"),
        )
        .with_working_directory(state.project_path.to_string_lossy())
        .with_language(self.language)
        .with_timeout_secs(600);
        self.runner
            .lock()
            .await
            .run_plan(std::slice::from_ref(&deps), state)
            .await;
        !state.failed_steps.contains(&deps.id)
    }

    async fn install_with_poetry(&self, state: &mut RunState) -> bool {
        let slug = self.slug();
        let check = Step::new(format!("{slug}_tool_probe"), "Check poetry", "poetry --version")
            .with_language(self.language);
        let check = probe(&self.runner, state, &check).await;
        if !check.is_success() {
            tracing::info!("poetry not found, installing");
            let tool = Step::new(
                format!("{slug}_tool"),
                "Install poetry",
                "python3 -m pip install poetry",
            )
            .with_language(self.language)
            .with_timeout_secs(300);
            self.runner
                .lock()
                .await
                .run_plan(std::slice::from_ref(&tool), state)
                .await;
            if state.is_cancelled() || state.failed_steps.contains(&tool.id) {
                return false;
            }
        }
        let deps = Step::new(
            format!("{slug}_deps"),
            "Install dependencies with poetry",
            "poetry install",
        )
        .with_working_directory(state.project_path.to_string_lossy())
        .with_language(self.language)
        .with_timeout_secs(600);
        self.runner
            .lock()
            .await
            .run_plan(std::slice::from_ref(&deps), state)
            .await;
        !state.failed_steps.contains(&deps.id)
    }
}

#[async_trait::async_trait]
impl LanguageHandler for PythonHandler {
    fn language(&self) -> Language {
        self.language
    }

    async fn process(&self, mut state: RunState) -> RunState {
        tracing::info!(variant = self.language.as_str(), "setting up Python environment");
        state.metrics.language_mut(self.language).start();
        let slug = self.slug();

        let check = Step::new(format!("{slug}_probe"), "Check Python", "python3 --version")
            .with_language(self.language);
        let check = probe(&self.runner, &mut state, &check).await;
        if check.is_success() {
            tracing::info!(version = %check.output, "Python detected");
        } else {
            tracing::info!("Python not found, installing");
            let steps = self.install_steps();
            self.runner.lock().await.run_plan(&steps, &mut state).await;
            if state.is_cancelled() {
                return state;
            }
            if any_step_failed(&state, &steps) {
                fail_language(
                    &mut state,
                    self.language,
                    "failed to install Python",
                    "python_handler",
                );
                return state;
            }
        }

        // pip projects get a project-local virtualenv; a failure here is
        // survivable because pip falls back to the interpreter's module
        if self.language == Language::PythonPip && !state.project_path.join("venv").exists() {
            let venv = Step::new(
                format!("{slug}_venv"),
                "Create virtual environment",
                "python3 -m venv venv",
            )
            .with_working_directory(state.project_path.to_string_lossy())
            .with_language(self.language)
            .with_timeout_secs(60);
            self.runner
                .lock()
                .await
                .run_plan(std::slice::from_ref(&venv), &mut state)
                .await;
            if state.is_cancelled() {
                return state;
            }
            if state.failed_steps.contains(&venv.id) {
                tracing::warn!("virtual environment creation failed, continuing without one");
            }
        }

        // dependency install mirrors whichever manifest the scanner found
        if state.language_configs.contains_key(&self.language) {
            let ok = match self.language {
                Language::PythonPoetry => self.install_with_poetry(&mut state).await,
                _ => self.install_requirements(&mut state).await,
            };
            if state.is_cancelled() {
                return state;
            }
            if !ok {
                fail_language(
                    &mut state,
                    self.language,
                    "failed to install Python dependencies",
                    "python_handler",
                );
                return state;
            }
        }

        complete_language(&mut state, self.language);
        tracing::info!(variant = self.language.as_str(), "Python environment ready");
        state
    }
}
