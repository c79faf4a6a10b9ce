//! Route-level tests for templates and usage history
//!
//! A real server is bound on an ephemeral port and driven with reqwest.

use prompt_runner::api::build_router;
use prompt_runner::config::Config;
use prompt_runner::state::AppState;
use prompt_runner::store::SqliteStore;
use serde_json::{json, Value};
use std::sync::Arc;

async fn start_server() -> String {
    let store = SqliteStore::in_memory().await.unwrap();
    let mut config = Config::default();
    config.provider.base_url = "http://127.0.0.1:1".to_string();
    let state = Arc::new(AppState::new(config, Arc::new(store), reqwest::Client::new()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_template_routes() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let created = client
        .post(format!("{}/api/templates", base))
        .json(&json!({"name": "Haiku", "user_prompt": "Write a haiku about "}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let created: Value = created.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["default_parameters"]["top_p"], 0.4);

    let clash = client
        .post(format!("{}/api/templates", base))
        .json(&json!({"name": "Haiku"}))
        .send()
        .await
        .unwrap();
    assert_eq!(clash.status(), 409);
    let body: Value = clash.json().await.unwrap();
    assert_eq!(body["status"], 409);

    let updated: Value = client
        .put(format!("{}/api/templates/{}", base, id))
        .json(&json!({"name": "Haiku (strict)", "description": "5-7-5"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["description"], "5-7-5");

    let listed: Value = client
        .get(format!("{}/api/templates", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["name"], "Haiku (strict)");

    let deleted = client
        .delete(format!("{}/api/templates/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    let missing = client
        .get(format!("{}/api/templates/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_usage_history_counts_submissions() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    for model in ["gpt-4o", "gpt-4o", "claude-3-5-haiku"] {
        let accepted = client
            .post(format!("{}/api/prompts/execute", base))
            .json(&json!({
                "prompt": {"user_prompt": "hi", "selected_model": model},
                "iterations": 1,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), 202);
    }

    let report: Value = client
        .get(format!("{}/api/usage_history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(report["statistics"]["prompts_count"], 3);
    assert_eq!(report["statistics"]["executions_count"], 3);
    assert_eq!(report["recent_prompts"].as_array().unwrap().len(), 3);
    assert_eq!(report["model_usage"][0], json!({"model": "gpt-4o", "count": 2}));
    assert_eq!(report["model_usage"][1], json!({"model": "claude-3-5-haiku", "count": 1}));
}
