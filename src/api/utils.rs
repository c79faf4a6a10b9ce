//! API utility functions
//!
//! Lookup helpers shared by the prompt handlers.

use crate::error::AppError;
use crate::state::AppState;
use crate::store::models::Execution;

/// Load an execution or fail with 404
pub async fn require_execution(state: &AppState, id: &str) -> Result<Execution, AppError> {
    state
        .store
        .get_execution(id)
        .await?
        .ok_or_else(|| AppError::ExecutionNotFound(id.to_string()))
}
