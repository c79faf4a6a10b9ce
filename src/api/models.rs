//! Service metadata handlers

use crate::provider::ProviderKind;
use axum::Json;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok" while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
}

/// One provider family and the model ids it accepts
#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    /// Stable identifier
    pub id: ProviderKind,
    /// Human-readable name
    pub name: &'static str,
    /// Accepted model-id prefixes
    pub model_prefixes: &'static [&'static str],
}

/// GET /api/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/models - Provider families and their model prefixes
pub async fn list_models() -> Json<Vec<ProviderInfo>> {
    Json(
        ProviderKind::ALL
            .into_iter()
            .map(|kind| ProviderInfo {
                id: kind,
                name: kind.display_name(),
                model_prefixes: kind.model_prefixes(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_models_covers_every_provider() {
        let Json(models) = list_models().await;
        assert_eq!(models.len(), 3);
        let json = serde_json::to_value(&models).unwrap();
        assert_eq!(json[0]["id"], "openai");
        assert_eq!(json[1]["model_prefixes"][0], "claude");
    }

    #[tokio::test]
    async fn test_health_check() {
        let Json(health) = health_check().await;
        assert_eq!(health.status, "ok");
        assert!(!health.version.is_empty());
    }
}
