use gw_core::types::{Language, Step};

use super::{any_step_failed, complete_language, fail_language, probe, SharedRunner};
use crate::queue::LanguageHandler;
use crate::state::RunState;

/// Java setup shared by the Maven and Gradle variants: JDK check,
/// OS-conditional install, then a test-free build with the detected tool.
/// Build trouble downgrades to dependency resolution instead of failing the
/// language, because a broken build is a project problem, not a setup one.
pub struct JavaHandler {
    language: Language,
    runner: SharedRunner,
}

impl JavaHandler {
    /// Variant for projects driven by `pom.xml`.
    pub fn maven(runner: SharedRunner) -> Self {
        Self {
            language: Language::JavaMaven,
            runner,
        }
    }

    /// Variant for projects driven by a Gradle build script.
    pub fn gradle(runner: SharedRunner) -> Self {
        Self {
            language: Language::JavaGradle,
            runner,
        }
    }

    fn slug(&self) -> String {
        self.language.as_str().replace('-', "_")
    }

    fn jdk_install_steps(&self) -> Vec<Step> {
        let slug = self.slug();
        if cfg!(target_os = "windows") {
            vec![Step::new(
                format!("{slug}_install"),
                "Install OpenJDK 17",
                "winget install Microsoft.OpenJDK.17 --accept-package-agreements --accept-source-agreements",
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
                    "Install OpenJDK 17",
                    "sudo apt-get install -y openjdk-17-jdk",
                )
                .with_language(self.language)
                .with_timeout_secs(300)
                .with_sudo(true),
            ]
        }
    }

    async fn build_with_maven(&self, state: &mut RunState) -> bool {
        let slug = self.slug();
        let check = Step::new(format!("{slug}_tool_probe"), "Check Maven", "mvn --version")
            .with_language(self.language);
        if !probe(&self.runner, state, &check).await.is_success() {
            tracing::info!("Maven not found, installing");
            let tool = Step::new(
                format!("{slug}_tool"),
                "Install Maven",
                "sudo apt-get install -y maven",
            )
            .with_language(self.language)
            .with_timeout_secs(300)
            .with_sudo(true);
            self.runner
                .lock()
                .await
                .run_plan(std::slice::from_ref(&tool), state)
                .await;
            if state.is_cancelled() || state.failed_steps.contains(&tool.id) {
                return false;
            }
        }

        let build = vec![
            Step::new(format!("{slug}_clean"), "Clean previous build output", "mvn clean")
                .with_working_directory(state.project_path.to_string_lossy())
                .with_language(self.language)
                .with_timeout_secs(120),
            Step::new(
                format!("{slug}_build"),
                "Build project without tests",
                "mvn install -DskipTests",
            )
            .with_working_directory(state.project_path.to_string_lossy())
            .with_language(self.language)
            .with_timeout_secs(900),
        ];
        self.runner.lock().await.run_plan(&build, state).await;
        if state.is_cancelled() {
            return false;
        }
        if state.failed_steps.contains(&format!("{slug}_build")) {
            tracing::warn!("build failed, falling back to dependency resolution");
            let resolve = Step::new(
                format!("{slug}_resolve"),
                "Resolve dependencies",
                "mvn dependency:resolve",
            )
            .with_working_directory(state.project_path.to_string_lossy())
            .with_language(self.language)
            .with_timeout_secs(600);
            self.runner
                .lock()
                .await
                .run_plan(std::slice::from_ref(&resolve), state)
                .await;
            if state.failed_steps.contains(&resolve.id) {
                tracing::warn!("Maven dependency installation had issues");
            }
        }
        true
    }

    async fn build_with_gradle(&self, state: &mut RunState) -> bool {
        let slug = self.slug();
        let gradle_cmd = if state.project_path.join("gradlew").exists() {
            if !cfg!(target_os = "windows") {
                let wrapper = Step::new(
                    format!("{slug}_wrapper"),
                    "Make the Gradle wrapper executable",
                    "chmod +x gradlew",
                )
                .with_working_directory(state.project_path.to_string_lossy())
                .with_language(self.language)
                .with_timeout_secs(60);
                self.runner
                    .lock()
                    .await
                    .run_plan(std::slice::from_ref(&wrapper), state)
                    .await;
                if state.is_cancelled() {
                    return false;
                }
            }
            "./gradlew"
        } else {
            let check = Step::new(format!("{slug}_tool_probe"), "Check Gradle", "gradle --version")
                .with_language(self.language);
            if !probe(&self.runner, state, &check).await.is_success() {
                tracing::info!("Gradle not found, installing");
                let tool = Step::new(
                    format!("{slug}_tool"),
                    "Install Gradle",
                    "sudo apt-get install -y gradle",
                )
                .with_language(self.language)
                .with_timeout_secs(300)
                .with_sudo(true);
                self.runner
                    .lock()
                    .await
                    .run_plan(std::slice::from_ref(&tool), state)
                    .await;
                if state.is_cancelled() || state.failed_steps.contains(&tool.id) {
                    return false;
                }
            }
            "gradle"
        };

        let build = Step::new(
            format!("{slug}_build"),
            "Build project without tests",
            format!("{gradle_cmd} build -x test"),
        )
        .with_working_directory(state.project_path.to_string_lossy())
        .with_language(self.language)
        .with_timeout_secs(900);
        self.runner
            .lock()
            .await
            .run_plan(std::slice::from_ref(&build), state)
            .await;
        if state.is_cancelled() {
            return false;
        }
        if state.failed_steps.contains(&build.id) {
            tracing::warn!("build failed, falling back to dependency resolution");
            let resolve = Step::new(
                format!("{slug}_resolve"),
                "Resolve dependencies",
                format!("{gradle_cmd} dependencies"),
            )
            .with_working_directory(state.project_path.to_string_lossy())
            .with_language(self.language)
            .with_timeout_secs(600);
            self.runner
                .lock()
                .await
                .run_plan(std::slice::from_ref(&resolve), state)
                .await;
            if state.failed_steps.contains(&resolve.id) {
                tracing::warn!("Gradle dependency resolution had issues");
            }
        }
        true
    }
}

#[async_trait::async_trait]
impl LanguageHandler for JavaHandler {
    fn language(&self) -> Language {
        self.language
    }

    async fn process(&self, mut state: RunState) -> RunState {
        tracing::info!(variant = self.language.as_str(), "setting up Java environment");
        state.metrics.language_mut(self.language).start();
        let slug = self.slug();

        // java prints its version banner to stderr, so a zero exit is the signal
        let check = Step::new(format!("{slug}_probe"), "Check Java", "java -version")
            .with_language(self.language);
        if probe(&self.runner, &mut state, &check).await.is_success() {
            tracing::info!("Java detected");
        } else {
            tracing::info!("Java not found, installing");
            let steps = self.jdk_install_steps();
            self.runner.lock().await.run_plan(&steps, &mut state).await;
            if state.is_cancelled() {
                return state;
            }
            if any_step_failed(&state, &steps) {
                fail_language(
                    &mut state,
                    self.language,
                    "failed to install a JDK",
                    "java_handler",
                );
                return state;
            }
        }

        // build only when the scanner found the matching manifest
        if state.language_configs.contains_key(&self.language) {
            let ok = match self.language {
                Language::JavaGradle => self.build_with_gradle(&mut state).await,
                _ => self.build_with_maven(&mut state).await,
            };
            if state.is_cancelled() {
                return state;
            }
            if !ok {
                let tool = match self.language {
                    Language::JavaGradle => "Gradle",
                    _ => "Maven",
                };
                fail_language(
                    &mut state,
                    self.language,
                    format!("failed to install {tool}"),
                    "java_handler",
                );
                return state;
            }
        }

        if cfg!(unix) && std::env::var_os("JAVA_HOME").is_none() {
            let locate = Step::new(
                format!("{slug}_java_home"),
                "Locate the JDK home",
                "readlink -f $(which java) | sed 's|/bin/java||'",
            )
            .with_language(self.language);
            let result = probe(&self.runner, &mut state, &locate).await;
            let home = result.output.trim();
            if result.is_success() && !home.is_empty() {
                tracing::info!(
                    java_home = %home,
                    "JAVA_HOME is not set, consider exporting it from your shell profile"
                );
            }
        }

        complete_language(&mut state, self.language);
        tracing::info!(variant = self.language.as_str(), "Java environment ready");
        state
    }
}
