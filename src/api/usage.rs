//! Usage history handler

use crate::error::AppError;
use crate::state::AppState;
use crate::store::UsageReport;
use axum::{extract::State, Json};
use std::sync::Arc;

/// GET /api/usage_history - Row counts, newest prompts and model usage
pub async fn usage_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<UsageReport>, AppError> {
    Ok(Json(state.store.usage_report().await?))
}
