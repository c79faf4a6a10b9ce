//! Prompt execution API handlers
//!
//! Submission validates the prompt and iteration count, stores the prompt
//! and a pending execution, then hands the execution to the orchestrator.
//! The response returns before any iteration runs.

use crate::api::utils::require_execution;
use crate::error::AppError;
use crate::provider::GenerationParams;
use crate::state::AppState;
use crate::store::models::{validate_iterations, Execution, ExecutionId, Prompt, ResultRecord, StatusReport};
use crate::store::PersistenceError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Prompt configuration as submitted
#[derive(Debug, Deserialize)]
pub struct PromptInput {
    /// System prompt
    #[serde(default)]
    pub system_prompt: String,
    /// User prompt
    #[serde(default)]
    pub user_prompt: String,
    /// Model id
    #[serde(default)]
    pub selected_model: String,
    /// Sampling parameters; missing fields take their defaults
    #[serde(default)]
    pub parameters: GenerationParams,
}

/// Body of POST /api/prompts/execute
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Prompt to run
    pub prompt: PromptInput,
    /// Number of runs, 1..=10
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Stream chunks over the bus while generating
    #[serde(default)]
    pub streaming: bool,
}

fn default_iterations() -> u32 {
    1
}

/// Response of POST /api/prompts/execute
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    /// Id to poll or subscribe to
    pub execution_id: ExecutionId,
    /// Always "started"
    pub status: String,
}

/// POST /api/prompts/execute - Start an execution
pub async fn execute_prompt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), AppError> {
    // Reject before anything is written
    validate_iterations(request.iterations)?;
    let prompt = Prompt::new(
        request.prompt.system_prompt,
        request.prompt.user_prompt,
        request.prompt.selected_model,
        request.prompt.parameters,
    )?;
    let execution = Execution::new(prompt.id.clone(), request.iterations, request.streaming)?;

    state.store.create_prompt(&prompt).await?;
    state.store.create_execution(&execution).await?;

    info!(
        execution_id = %execution.id,
        model = %prompt.selected_model,
        iterations = execution.iterations,
        streaming = execution.streaming,
        "Execution submitted"
    );

    state.orchestrator.spawn(execution.id.clone());

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            execution_id: execution.id,
            status: "started".to_string(),
        }),
    ))
}

/// GET /api/prompts/:id/status - Execution, prompt and results so far
pub async fn execution_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ExecutionId>,
) -> Result<Json<StatusReport>, AppError> {
    state
        .store
        .status_report(&id)
        .await?
        .map(Json)
        .ok_or(AppError::ExecutionNotFound(id))
}

/// GET /api/prompts/:id/results/:iteration - One iteration's result
pub async fn iteration_result(
    State(state): State<Arc<AppState>>,
    Path((id, iteration)): Path<(ExecutionId, u32)>,
) -> Result<Json<ResultRecord>, AppError> {
    require_execution(&state, &id).await?;

    match state.store.find_result(&id, iteration).await {
        Ok(Some(result)) => Ok(Json(result)),
        Ok(None) => Err(AppError::ResultNotFound {
            execution_id: id,
            iteration,
        }),
        Err(PersistenceError::NotFound(_)) => Err(AppError::ExecutionNotFound(id)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ValidationError;
    use crate::store::{ExecutionStore, SqliteStore};

    async fn create_test_state() -> Arc<AppState> {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut config = Config::default();
        // Nothing listens here; spawned runs record error results
        config.provider.base_url = "http://127.0.0.1:1".to_string();
        Arc::new(AppState::new(config, Arc::new(store), reqwest::Client::new()))
    }

    fn request(iterations: u32, model: &str) -> ExecuteRequest {
        serde_json::from_value(serde_json::json!({
            "prompt": {"user_prompt": "Say hi", "selected_model": model},
            "iterations": iterations,
        }))
        .unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let request: ExecuteRequest = serde_json::from_str(
            r#"{"prompt": {"user_prompt": "hi", "selected_model": "gpt-4o"}}"#,
        )
        .unwrap();
        assert_eq!(request.iterations, 1);
        assert!(!request.streaming);
        assert_eq!(request.prompt.parameters, GenerationParams::default());
    }

    #[tokio::test]
    async fn test_execute_rejects_iterations_out_of_range() {
        let state = create_test_state().await;
        let result = execute_prompt(State(state), Json(request(11, "gpt-4o"))).await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::IterationsOutOfRange { value: 11, .. }))
        ));
    }

    #[tokio::test]
    async fn test_execute_rejects_unknown_model() {
        let state = create_test_state().await;
        let result = execute_prompt(State(state), Json(request(2, "llama-3"))).await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::UnknownModel(_)))
        ));
    }

    #[tokio::test]
    async fn test_execute_then_status() {
        let state = create_test_state().await;
        let (status, Json(response)) =
            execute_prompt(State(state.clone()), Json(request(2, "claude-3-5-haiku")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(response.status, "started");

        let Json(report) = execution_status(State(state.clone()), Path(response.execution_id.clone()))
            .await
            .unwrap();
        assert_eq!(report.execution.execution.iterations, 2);
        assert_eq!(report.execution.prompt.user_prompt, "Say hi");
    }

    #[tokio::test]
    async fn test_status_unknown_execution() {
        let state = create_test_state().await;
        let result = execution_status(State(state), Path("missing".to_string())).await;
        assert!(matches!(result, Err(AppError::ExecutionNotFound(_))));
    }

    #[tokio::test]
    async fn test_iteration_result_lookup() {
        let state = create_test_state().await;
        let prompt = Prompt::new(
            String::new(),
            "hi".into(),
            "gpt-4o".into(),
            GenerationParams::default(),
        )
        .unwrap();
        let execution = Execution::new(prompt.id.clone(), 2, false).unwrap();
        state.store.create_prompt(&prompt).await.unwrap();
        state.store.create_execution(&execution).await.unwrap();
        state
            .store
            .append_result(&ResultRecord::failure(&execution.id, 1, "refused"))
            .await
            .unwrap();

        let Json(found) = iteration_result(State(state.clone()), Path((execution.id.clone(), 1)))
            .await
            .unwrap();
        assert_eq!(found.error_message.as_deref(), Some("refused"));

        let missing = iteration_result(State(state.clone()), Path((execution.id.clone(), 2))).await;
        assert!(matches!(missing, Err(AppError::ResultNotFound { iteration: 2, .. })));

        let unknown = iteration_result(State(state), Path(("nope".to_string(), 1))).await;
        assert!(matches!(unknown, Err(AppError::ExecutionNotFound(_))));
    }
}
