use std::collections::HashMap;
use std::sync::Arc;

use gw_core::error::{ErrorKind, Severity, SetupError};
use gw_core::types::Language;

use crate::state::RunState;

// ---------------------------------------------------------------------------
// LanguageHandler trait
// ---------------------------------------------------------------------------

/// Per-language setup plug-in.
///
/// A handler owns exactly one language: it may mark that language completed
/// or failed on the state it returns, and must never touch another
/// language's entries.
#[async_trait::async_trait]
pub trait LanguageHandler: Send + Sync {
    fn language(&self) -> Language;
    async fn process(&self, state: RunState) -> RunState;
}

// ---------------------------------------------------------------------------
// LanguageQueueExecutor
// ---------------------------------------------------------------------------

/// Drains the detected-language queue one language per call.
///
/// The owning engine re-enters between calls, so routing and cancellation
/// are re-evaluated after every language. Each call strictly shrinks the
/// remaining set (the dispatched language always ends up completed or
/// failed), which bounds the engine's execution loop at queue length.
pub struct LanguageQueueExecutor {
    handlers: HashMap<Language, Arc<dyn LanguageHandler>>,
}

impl LanguageQueueExecutor {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_handlers(handlers: impl IntoIterator<Item = Arc<dyn LanguageHandler>>) -> Self {
        let mut executor = Self::new();
        for handler in handlers {
            executor.register(handler);
        }
        executor
    }

    pub fn register(&mut self, handler: Arc<dyn LanguageHandler>) {
        self.handlers.insert(handler.language(), handler);
    }

    pub fn has_handler(&self, language: Language) -> bool {
        self.handlers.contains_key(&language)
    }

    /// Process exactly one language from the queue.
    ///
    /// Dependency-critical toolchains run first: remaining languages are
    /// ordered by `Language::priority()`, ties broken by detection order.
    pub async fn execute_next(&self, mut state: RunState) -> RunState {
        let mut remaining = state.remaining_languages();
        remaining.sort_by_key(|l| l.priority());

        let Some(language) = remaining.first().copied() else {
            state.update_queue_flags();
            tracing::debug!("language queue drained");
            return state;
        };

        tracing::info!(
            language = %language,
            remaining = remaining.len(),
            "processing language"
        );

        state = match self.handlers.get(&language) {
            Some(handler) => handler.process(state).await,
            None => {
                state.errors.record(
                    SetupError::new(
                        ErrorKind::UnsupportedLanguage,
                        format!("no handler registered for {language}"),
                        "queue",
                    )
                    .with_severity(Severity::High)
                    .with_language(language),
                );
                state.mark_language_failed(language);
                state
            }
        };

        // a handler that reports no outcome counts as a fault, unless the
        // run was cancelled out from under it
        if !state.is_cancelled()
            && !state.completed_languages.contains(&language)
            && !state.failed_languages.contains(&language)
        {
            tracing::warn!(language = %language, "handler finished without reporting an outcome");
            state.errors.record(
                SetupError::new(
                    ErrorKind::Unknown,
                    format!("{language} handler finished without reporting an outcome"),
                    "queue",
                )
                .with_language(language),
            );
            state.mark_language_failed(language);
        }

        if state.failed_languages.contains(&language) {
            let still_queued = state.remaining_languages();
            if blocking_failure(language, &still_queued) {
                tracing::error!(
                    language = %language,
                    "toolchain failure blocks languages still queued, ending run"
                );
                state.workflow_should_end = true;
            }
        }

        state.update_queue_flags();
        state
    }
}

impl Default for LanguageQueueExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// True when `failed` shares a toolchain with anything still queued;
/// those languages cannot install once their prerequisite is broken.
fn blocking_failure(failed: Language, remaining: &[Language]) -> bool {
    remaining
        .iter()
        .any(|l| toolchain_family(*l) == toolchain_family(failed))
}

fn toolchain_family(language: Language) -> &'static str {
    match language {
        Language::JavaMaven | Language::JavaGradle => "jvm",
        Language::PythonPip | Language::PythonPoetry => "python",
        Language::NodeJs => "node",
        Language::Golang => "go",
        Language::Rust => "rust",
        Language::Ruby => "ruby",
        Language::Docker => "docker",
        Language::Make => "make",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
