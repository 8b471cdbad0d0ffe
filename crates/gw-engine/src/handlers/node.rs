use gw_core::types::{Language, Step};

use super::{any_step_failed, complete_language, fail_language, probe, SharedRunner};
use crate::queue::LanguageHandler;
use crate::state::RunState;

/// Node.js setup: toolchain check, OS-conditional install, dependency
/// install with the detected package manager.
pub struct NodeHandler {
    runner: SharedRunner,
}

impl NodeHandler {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }

    fn install_steps() -> Vec<Step> {
        if cfg!(target_os = "windows") {
            vec![Step::new(
                "nodejs_install",
                "Install Node.js",
                "winget install OpenJS.NodeJS --accept-package-agreements --accept-source-agreements",
            )
            .with_language(Language::NodeJs)
            .with_timeout_secs(300)]
        } else {
            vec![
                Step::new(
                    "nodejs_repo",
                    "Add NodeSource repository",
                    "curl -fsSL https://deb.nodesource.com/setup_lts.x | sudo -E bash -",
                )
                .with_language(Language::NodeJs)
                .with_timeout_secs(300)
                .with_sudo(true),
                Step::new("nodejs_install", "Install Node.js", "sudo apt-get install -y nodejs")
                    .with_language(Language::NodeJs)
                    .with_timeout_secs(300)
                    .with_sudo(true),
            ]
        }
    }
}

#[async_trait::async_trait]
impl LanguageHandler for NodeHandler {
    fn language(&self) -> Language {
        Language::NodeJs
    }

    async fn process(&self, mut state: RunState) -> RunState {
        tracing::info!("setting up Node.js environment");
        state.metrics.language_mut(Language::NodeJs).start();

        let check = Step::new("nodejs_probe", "Check Node.js", "node --version")
            .with_language(Language::NodeJs);
        let check = probe(&self.runner, &mut state, &check).await;
        if check.is_success() {
            tracing::info!(version = %check.output, "Node.js detected");
        } else {
            tracing::info!("Node.js not found, installing");
            let steps = Self::install_steps();
            self.runner.lock().await.run_plan(&steps, &mut state).await;
            if state.is_cancelled() {
                return state;
            }
            if any_step_failed(&state, &steps) {
                fail_language(
                    &mut state,
                    Language::NodeJs,
                    "failed to install Node.js",
                    "node_handler",
                );
                return state;
            }
        }

        // install project dependencies when the scanner found a manifest
        if let Some(config) = state.language_configs.get(&Language::NodeJs).cloned() {
            let manager = config.package_manager.as_deref().unwrap_or("npm");
            let command = if manager == "yarn" {
                "yarn install"
            } else {
                "npm install"
            };
            tracing::info!(manager, "installing dependencies");
            let deps = Step::new(
                "nodejs_deps",
                format!("Install dependencies with {manager}"),
                command,
            )
            .with_working_directory(state.project_path.to_string_lossy())
            .with_language(Language::NodeJs)
            .with_timeout_secs(600);
            self.runner
                .lock()
                .await
                .run_plan(std::slice::from_ref(&deps), &mut state)
                .await;
            if state.is_cancelled() {
                return state;
            }
            if state.failed_steps.contains(&deps.id) {
                fail_language(
                    &mut state,
                    Language::NodeJs,
                    "failed to install Node.js dependencies",
                    "node_handler",
                );
                return state;
            }
        }

        complete_language(&mut state, Language::NodeJs);
        tracing::info!("Node.js environment ready");
        state
    }
}
