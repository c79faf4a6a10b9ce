//! Template API handlers
//!
//! Named prompt skeletons a client can prefill a submission from. Names are
//! unique; a clash answers 409.

use crate::error::AppError;
use crate::state::AppState;
use crate::store::models::{Template, TemplateDraft, TemplateId};
use crate::store::PersistenceError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

async fn require_template(state: &AppState, id: &str) -> Result<Template, AppError> {
    state
        .store
        .get_template(id)
        .await?
        .ok_or_else(|| AppError::TemplateNotFound(id.to_string()))
}

/// GET /api/templates - Every template, ordered by name
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Template>>, AppError> {
    Ok(Json(state.store.list_templates().await?))
}

/// POST /api/templates - Create a template
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<TemplateDraft>,
) -> Result<(StatusCode, Json<Template>), AppError> {
    let template = Template::new(draft)?;
    state.store.create_template(&template).await?;

    info!(template_id = %template.id, name = %template.name, "Template created");
    Ok((StatusCode::CREATED, Json(template)))
}

/// GET /api/templates/:id
pub async fn show_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TemplateId>,
) -> Result<Json<Template>, AppError> {
    require_template(&state, &id).await.map(Json)
}

/// PUT /api/templates/:id - Replace a template's fields
pub async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TemplateId>,
    Json(draft): Json<TemplateDraft>,
) -> Result<Json<Template>, AppError> {
    let mut template = require_template(&state, &id).await?;
    template.apply(draft)?;

    match state.store.update_template(&template).await {
        Ok(()) => Ok(Json(template)),
        // Deleted between the read and the write
        Err(PersistenceError::NotFound(_)) => Err(AppError::TemplateNotFound(id)),
        Err(e) => Err(e.into()),
    }
}

/// DELETE /api/templates/:id
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TemplateId>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_template(&id).await? {
        info!(template_id = %id, "Template deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::TemplateNotFound(id))
    }
}
