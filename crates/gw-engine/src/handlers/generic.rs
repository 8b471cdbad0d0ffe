use gw_core::types::{Language, Step};

use super::{any_step_failed, complete_language, fail_language, SharedRunner};
use crate::queue::LanguageHandler;
use crate::state::RunState;

/// Fallback handler driven entirely by the planner: it runs whatever steps
/// the plan attributed to its language, with no recipe of its own.
pub struct GenericHandler {
    language: Language,
    runner: SharedRunner,
}

impl GenericHandler {
    pub fn new(language: Language, runner: SharedRunner) -> Self {
        Self { language, runner }
    }
}

#[async_trait::async_trait]
impl LanguageHandler for GenericHandler {
    fn language(&self) -> Language {
        self.language
    }

    async fn process(&self, mut state: RunState) -> RunState {
        tracing::info!(language = self.language.as_str(), "running planned setup steps");
        state.metrics.language_mut(self.language).start();

        let steps: Vec<Step> = state
            .plan
            .as_ref()
            .map(|plan| plan.steps_for(self.language).into_iter().cloned().collect())
            .unwrap_or_default();
        if steps.is_empty() {
            tracing::info!(language = self.language.as_str(), "plan has no steps for this language");
            complete_language(&mut state, self.language);
            return state;
        }

        self.runner.lock().await.run_plan(&steps, &mut state).await;
        if state.is_cancelled() {
            return state;
        }
        if any_step_failed(&state, &steps) {
            fail_language(
                &mut state,
                self.language,
                format!("setup steps failed for {}", self.language.as_str()),
                "generic_handler",
            );
            return state;
        }

        complete_language(&mut state, self.language);
        state
    }
}
