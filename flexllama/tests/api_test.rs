//! Integration tests for the HTTP surface, driven in-process with
//! `tower::ServiceExt::oneshot` against the real `Router`. None of these
//! trigger an actual model load — that is exercised by the `runner` and
//! `process` unit tests with a real spawned process — so the catalog below
//! only needs to describe aliases, not launchable binaries.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use flexllama::catalog::{Catalog, LaunchOpts, ModelSpec};
use flexllama::config::{ApiConfig, Config, RetryConfig, RunnerConfig};
use flexllama::health::HealthAggregator;
use flexllama::routes;
use flexllama::state::AppState;
use flexllama::supervisor::Supervisor;
use flexllama_common::ModelKind;

fn test_config() -> Config {
    let mut runners = HashMap::new();
    runners.insert(
        "r1".to_string(),
        RunnerConfig {
            id: "r1".to_string(),
            binary_path: "/bin/true".to_string(),
            listen_host: "127.0.0.1".to_string(),
            listen_port: 39201,
            extra_args: vec![],
            env: HashMap::new(),
            inherit_env: false,
            auto_unload_timeout_secs: 0,
            launch_deadline_secs: 1,
            shutdown_grace_secs: 1,
            log_server_output: false,
        },
    );

    Config {
        auto_start_runners: false,
        api: ApiConfig::default(),
        retry_config: RetryConfig::default(),
        request_timeout_seconds: 30,
        streaming_timeout_seconds: 0,
        runners,
        models: vec![
            ModelSpec {
                alias: "m1".to_string(),
                runner_id: "r1".to_string(),
                model_path: "/models/m1.gguf".to_string(),
                kind: ModelKind::Chat,
                mmproj_path: None,
                env: HashMap::new(),
                launch_opts: LaunchOpts::default(),
            },
            ModelSpec {
                alias: "embed1".to_string(),
                runner_id: "r1".to_string(),
                model_path: "/models/embed1.gguf".to_string(),
                kind: ModelKind::Embedding,
                mmproj_path: None,
                env: HashMap::new(),
                launch_opts: LaunchOpts::default(),
            },
        ],
    }
}

fn test_app() -> Router {
    let config = test_config();
    let catalog = Catalog::new(config.models.clone());
    let supervisor = Arc::new(Supervisor::new(&config, catalog));
    let health = Arc::new(HealthAggregator::new(supervisor.clone()));
    let state = Arc::new(AppState::new(config, supervisor, health));
    Router::new().merge(routes::router()).with_state(state)
}

#[tokio::test]
async fn models_endpoint_lists_the_catalog() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let ids: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"m1"));
    assert!(ids.contains(&"embed1"));
}

#[tokio::test]
async fn health_endpoint_returns_the_cached_snapshot_shape() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    // The aggregator hasn't ticked in this test, so this only checks the
    // shape of the default snapshot; probing behavior is covered in health.rs.
    assert!(json["active_runners"].is_object());
    assert!(json["model_health"].is_object());
}

#[tokio::test]
async fn chat_completions_with_unknown_alias_returns_404() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"model":"does-not-exist","messages":[],"stream":false}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn embeddings_against_a_chat_model_is_rejected() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/embeddings")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"model":"m1","input":"hello"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn control_stop_on_unknown_runner_reports_failure_without_5xx() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/runners/ghost/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn control_stop_on_an_idle_known_runner_succeeds() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/runners/r1/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);
}
