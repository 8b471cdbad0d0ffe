use std::sync::Arc;

use serde_json::Value;

use gw_reason::provider::{generate_structured, ReasoningProvider};

use crate::state::{RunState, WorkflowPath};

// ---------------------------------------------------------------------------
// OrchestrateStage
// ---------------------------------------------------------------------------

/// Entry stage: sizes up the request and picks the workflow path.
///
/// The complexity consult is advisory. When the backend is missing or
/// misbehaves the run proceeds on the standard path; fast mode skips the
/// consult entirely.
pub struct OrchestrateStage {
    provider: Arc<dyn ReasoningProvider>,
}

impl OrchestrateStage {
    pub fn new(provider: Arc<dyn ReasoningProvider>) -> Self {
        Self { provider }
    }

    pub async fn run(&self, mut state: RunState) -> RunState {
        tracing::info!(
            project = %state.project_name,
            mode = state.mode.as_str(),
            run_id = %state.run_id,
            "starting setup run"
        );

        if state.preferences.fast_mode {
            state.workflow_path = WorkflowPath::FastTrack;
            tracing::info!("fast mode requested, taking the fast track");
            return state;
        }

        let prompt = complexity_prompt(&state);
        state.workflow_path = match generate_structured(self.provider.as_ref(), &prompt).await {
            Ok(assessment) => {
                if let Some(approach) =
                    assessment.get("recommended_approach").and_then(Value::as_str)
                {
                    tracing::debug!(approach = approach, "complexity assessment");
                }
                path_for(assessment.get("complexity").and_then(Value::as_str))
            }
            Err(e) => {
                tracing::debug!(error = %e, "complexity assessment unavailable");
                WorkflowPath::Standard
            }
        };
        tracing::info!(path = state.workflow_path.as_str(), "workflow path chosen");
        state
    }
}

fn path_for(complexity: Option<&str>) -> WorkflowPath {
    match complexity {
        Some("simple") => WorkflowPath::FastTrack,
        Some("complex") => WorkflowPath::Comprehensive,
        _ => WorkflowPath::Standard,
    }
}

fn complexity_prompt(state: &RunState) -> String {
    format!(
        "Analyze this setup request and determine the approach.\n\n\
         Request context:\n\
         - Project path: {path}\n\
         - Mode: {mode}\n\
         - Skip verification: {skip}\n\n\
         Respond with a JSON object:\n\
         {{\n\
         \x20 \"complexity\": \"simple|moderate|complex\",\n\
         \x20 \"estimated_duration\": \"time estimate\",\n\
         \x20 \"requires_interaction\": true or false,\n\
         \x20 \"special_considerations\": [\"list of considerations\"],\n\
         \x20 \"recommended_approach\": \"one sentence\"\n\
         }}",
        path = state.project_path.display(),
        mode = state.mode.as_str(),
        skip = state.preferences.skip_verification,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::types::{Mode, Preferences};
    use gw_reason::provider::{ScriptedProvider, StubProvider};

    fn make_state(preferences: Preferences) -> RunState {
        RunState::new("/tmp/demo", Mode::Auto, preferences)
    }

    #[tokio::test]
    async fn simple_projects_take_the_fast_track() {
        let provider = Arc::new(ScriptedProvider::new([
            r#"{"complexity": "simple", "recommended_approach": "just install"}"#,
        ]));
        let stage = OrchestrateStage::new(provider.clone());

        let state = stage.run(make_state(Preferences::default())).await;
        assert_eq!(state.workflow_path, WorkflowPath::FastTrack);
        assert!(provider.prompts()[0].contains("Project path: /tmp/demo"));
    }

    #[tokio::test]
    async fn complex_projects_take_the_comprehensive_path() {
        let provider = Arc::new(ScriptedProvider::new([r#"{"complexity": "complex"}"#]));
        let state = OrchestrateStage::new(provider)
            .run(make_state(Preferences::default()))
            .await;
        assert_eq!(state.workflow_path, WorkflowPath::Comprehensive);
    }

    #[tokio::test]
    async fn unknown_complexity_stays_standard() {
        let provider = Arc::new(ScriptedProvider::new([r#"{"complexity": "spooky"}"#]));
        let state = OrchestrateStage::new(provider)
            .run(make_state(Preferences::default()))
            .await;
        assert_eq!(state.workflow_path, WorkflowPath::Standard);
    }

    #[tokio::test]
    async fn provider_failure_is_not_an_error() {
        let provider = Arc::new(StubProvider::new("offline"));
        let state = OrchestrateStage::new(provider)
            .run(make_state(Preferences::default()))
            .await;
        assert_eq!(state.workflow_path, WorkflowPath::Standard);
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn fast_mode_skips_the_consult() {
        let provider = Arc::new(ScriptedProvider::new([r#"{"complexity": "complex"}"#]));
        let preferences = Preferences {
            fast_mode: true,
            ..Preferences::default()
        };
        let state = OrchestrateStage::new(provider.clone())
            .run(make_state(preferences))
            .await;
        assert_eq!(state.workflow_path, WorkflowPath::FastTrack);
        assert!(provider.prompts().is_empty());
    }
}
