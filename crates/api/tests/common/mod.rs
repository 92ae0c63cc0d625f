#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use adclone_core::backoff::RetryPolicy;
use adclone_events::MemorySnapshotStore;
use adclone_pipeline::{Collaborators, PipelineConfig, SessionManager, SessionRegistry};
use adclone_provider::mock::{JobScript, MockCollaborators, ScriptedProvider};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use adclone_api::config::ServerConfig;
use adclone_api::router::build_app_router;
use adclone_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        local_planner: false,
        json_logs: false,
    }
}

/// Pipeline settings that finish a session in well under a second.
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        poll_interval: Duration::from_millis(10),
        job_deadline: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        },
        ..PipelineConfig::default()
    }
}

/// Build the production router backed by scripted doubles.
pub fn build_test_app(script: JobScript) -> (Router, Arc<SessionManager>) {
    let sessions = Arc::new(SessionManager::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(MemorySnapshotStore::new()),
        Collaborators::from_shared(Arc::new(MockCollaborators::new())),
        Arc::new(ScriptedProvider::new(script)),
        pipeline_config(),
    ));
    let state = AppState {
        sessions: sessions.clone(),
    };

    let app = build_app_router(state, &test_config());
    (app, sessions)
}

pub async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_empty(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Request::post(uri).body(Body::empty()).unwrap()).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
