// ---------------------------------------------------------------------------
// Language handler directory
// ---------------------------------------------------------------------------
//
// One module per setup recipe. Every handler drives its commands through the
// shared StepRunner so the safety gate, recovery, metrics, and error paths
// stay uniform across languages.

mod generic;
mod java;
mod node;
mod python;

pub use generic::GenericHandler;
pub use java::JavaHandler;
pub use node::NodeHandler;
pub use python::PythonHandler;

use std::sync::Arc;

use gw_core::error::{ErrorKind, Severity, SetupError};
use gw_core::types::{Language, Step, StepResult};
use tokio::sync::Mutex;

use crate::runner::StepRunner;
use crate::state::RunState;

/// Runner shared between handlers and stages.
pub type SharedRunner = Arc<Mutex<StepRunner>>;

/// Run a read-only check command outside the plan flow. A failed check is
/// expected (it triggers an install) and is never tracked as an error.
pub(crate) async fn probe(runner: &SharedRunner, state: &mut RunState, step: &Step) -> StepResult {
    let mut runner = runner.lock().await;
    let result = runner.execute(step).await;
    runner.flush_log(state);
    result
}

/// True when any of `steps` landed in the failed bucket.
pub(crate) fn any_step_failed(state: &RunState, steps: &[Step]) -> bool {
    steps.iter().any(|s| state.failed_steps.contains(&s.id))
}

/// Record a language-level setup failure: error, metrics, failed set.
pub(crate) fn fail_language(
    state: &mut RunState,
    language: Language,
    message: impl Into<String>,
    source: &str,
) {
    state.errors.record(
        SetupError::new(ErrorKind::InstallationFailed, message, source)
            .with_severity(Severity::High)
            .with_language(language),
    );
    state.metrics.language_mut(language).complete(false);
    state.mark_language_failed(language);
}

/// Record a successful language setup.
pub(crate) fn complete_language(state: &mut RunState, language: Language) {
    state.metrics.language_mut(language).complete(true);
    state.mark_language_completed(language);
}
