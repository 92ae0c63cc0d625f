use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use adclone_core::collaborators::{Analyzer, Assembler, CollaboratorError, ScenePrompt};
use adclone_core::provider::{GenerationProvider, ProviderError, RemoteStatus};
use adclone_core::variant::VariantLevel;
use adclone_provider::collaborator_api::{CollaboratorApiConfig, HttpCollaborators};
use adclone_provider::video_api::{HttpVideoProvider, VideoApiConfig};
use assert_matches::assert_matches;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Serve `app` on an ephemeral port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn video_config(base_url: String, output_dir: std::path::PathBuf) -> VideoApiConfig {
    VideoApiConfig {
        base_url,
        api_key: "test-key".into(),
        model: "sora-2".into(),
        size: "1280x720".into(),
        seconds: 8,
        output_dir,
        request_timeout_secs: 5,
    }
}

fn prompt() -> ScenePrompt {
    ScenePrompt {
        scene_index: 0,
        prompt: "a product shot".into(),
        duration_secs: None,
        metadata: Value::Null,
    }
}

#[derive(Clone, Default)]
struct VideoStub {
    polls: Arc<AtomicU32>,
}

async fn create_video(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-key") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "no key"})));
    }
    assert_eq!(body["seconds"], "8");
    assert_eq!(body["model"], "sora-2");
    (StatusCode::OK, Json(json!({"id": "video_123", "status": "queued"})))
}

async fn video_status(State(stub): State<VideoStub>, Path(id): Path<String>) -> Json<Value> {
    let n = stub.polls.fetch_add(1, Ordering::SeqCst);
    if n == 0 {
        Json(json!({"id": id, "status": "in_progress", "progress": 42.5}))
    } else {
        Json(json!({"id": id, "status": "completed", "progress": 100}))
    }
}

async fn video_content() -> &'static [u8] {
    b"fake-mp4-bytes"
}

#[tokio::test]
async fn video_provider_submits_polls_and_downloads() {
    let app = Router::new()
        .route("/videos", post(create_video))
        .route("/videos/{id}", get(video_status))
        .route("/videos/{id}/content", get(video_content))
        .with_state(VideoStub::default());
    let base = serve(app).await;
    let out = tempfile::tempdir().unwrap();
    let provider = HttpVideoProvider::new(video_config(base, out.path().to_path_buf())).unwrap();

    let job_id = provider.submit(&prompt()).await.unwrap();
    assert_eq!(job_id, "video_123");

    let first = provider.status(&job_id).await.unwrap();
    assert_eq!(first.status, RemoteStatus::InProgress);
    assert_eq!(first.progress, Some(42));

    let second = provider.status(&job_id).await.unwrap();
    assert_eq!(second.status, RemoteStatus::Completed);

    let path = provider.fetch(&job_id).await.unwrap();
    assert!(path.ends_with("video_123.mp4"));
    assert_eq!(std::fs::read(&path).unwrap(), b"fake-mp4-bytes");
    assert_eq!(files_in(out.path()), ["video_123.mp4"]);
}

fn files_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn interrupted_download_leaves_no_file_behind() {
    let app = Router::new().route(
        "/videos/{id}/content",
        get(|| async {
            let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                Ok(Bytes::from_static(b"first-half")),
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upstream dropped")),
            ];
            Body::from_stream(futures::stream::iter(chunks))
        }),
    );
    let base = serve(app).await;
    let out = tempfile::tempdir().unwrap();
    let provider = HttpVideoProvider::new(video_config(base, out.path().to_path_buf())).unwrap();

    assert!(provider.fetch("video_9").await.is_err());
    assert!(files_in(out.path()).is_empty());
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let app = Router::new().route(
        "/videos",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down") }),
    );
    let base = serve(app).await;
    let out = tempfile::tempdir().unwrap();
    let provider = HttpVideoProvider::new(video_config(base, out.path().to_path_buf())).unwrap();

    let err = provider.submit(&prompt()).await.unwrap_err();
    assert_matches!(err, ProviderError::RateLimited { retry_after: Some(d) } if d.as_secs() == 7);
    assert!(err.is_transient());
}

#[tokio::test]
async fn client_errors_are_not_transient() {
    let app = Router::new().route(
        "/videos",
        post(|| async { (StatusCode::BAD_REQUEST, "prompt rejected") }),
    );
    let base = serve(app).await;
    let out = tempfile::tempdir().unwrap();
    let provider = HttpVideoProvider::new(video_config(base, out.path().to_path_buf())).unwrap();

    let err = provider.submit(&prompt()).await.unwrap_err();
    assert_matches!(err, ProviderError::Api { status: 400, ref body } if body == "prompt rejected");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn unreachable_provider_is_a_transport_error() {
    let out = tempfile::tempdir().unwrap();
    // Nothing listens on port 9 of localhost in the test environment.
    let provider = HttpVideoProvider::new(video_config(
        "http://127.0.0.1:9".into(),
        out.path().to_path_buf(),
    ))
    .unwrap();
    let err = provider.status("video_1").await.unwrap_err();
    assert_matches!(err, ProviderError::Transport(_));
}

#[tokio::test]
async fn collaborators_post_json_and_map_errors() {
    let app = Router::new()
        .route(
            "/analyze",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "input_reference": body["input_reference"],
                    "scenes": [{"number": 1}, {"number": 2, "duration_secs": 12.0}],
                }))
            }),
        )
        .route(
            "/assemble",
            post(|Json(body): Json<Value>| async move {
                if body["level"] == "ultra" {
                    return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": "bad"})));
                }
                (StatusCode::OK, Json(json!({"artifact": "final.mp4"})))
            }),
        );
    let base = serve(app).await;
    let client = HttpCollaborators::new(&CollaboratorApiConfig {
        base_url: base,
        request_timeout_secs: 5,
    })
    .unwrap();

    let analysis = client.analyze("input.mp4").await.unwrap();
    assert_eq!(analysis.input_reference, "input.mp4");
    assert_eq!(analysis.scenes.len(), 2);

    let artifact = client
        .assemble(VariantLevel::Soft, &["a.mp4".to_string()])
        .await
        .unwrap();
    assert_eq!(artifact, "final.mp4");

    let err = client
        .assemble(VariantLevel::Ultra, &["a.mp4".to_string()])
        .await
        .unwrap_err();
    assert_matches!(err, CollaboratorError::Rejected(_));
}
