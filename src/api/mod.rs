//! API module
//!
//! HTTP handlers for submitting executions and reading their results,
//! managing templates and reading usage history

pub mod models;
pub mod prompts;
pub mod templates;
pub mod usage;
pub mod utils;

use crate::state::AppState;
use crate::websocket;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Routes of the service, without middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(models::health_check))
        .route("/api/models", get(models::list_models))
        .route("/api/prompts/execute", post(prompts::execute_prompt))
        .route("/api/prompts/:id/status", get(prompts::execution_status))
        .route(
            "/api/prompts/:id/results/:iteration",
            get(prompts::iteration_result),
        )
        .route(
            "/api/templates",
            get(templates::list_templates).post(templates::create_template),
        )
        .route(
            "/api/templates/:id",
            get(templates::show_template)
                .put(templates::update_template)
                .delete(templates::delete_template),
        )
        .route("/api/usage_history", get(usage::usage_history))
        .route("/ws/executions/:id", get(websocket::websocket_handler))
        .with_state(state)
}
