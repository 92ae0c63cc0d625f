//! REST client for a `/videos` style generation API.
//!
//! | Call     | Request                        |
//! |----------|--------------------------------|
//! | submit   | `POST {base}/videos`           |
//! | status   | `GET {base}/videos/{id}`       |
//! | fetch    | `GET {base}/videos/{id}/content` |
//!
//! Fetched content is streamed into a temporary file in `output_dir` that
//! replaces `{output_dir}/{id}.mp4` once the download is complete.

use std::path::PathBuf;
use std::time::Duration;

use adclone_core::collaborators::ScenePrompt;
use adclone_core::env;
use adclone_core::error::CoreError;
use adclone_core::provider::{GenerationProvider, ProviderError, RemoteStatus, StatusReport};
use adclone_core::types::OutputRef;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

/// Connection and request settings for the video API.
#[derive(Debug, Clone)]
pub struct VideoApiConfig {
    /// Base URL without trailing slash, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Resolution, e.g. `1792x1024`.
    pub size: String,
    /// Clip length used when a prompt does not specify one.
    pub seconds: u32,
    pub output_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl VideoApiConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                      | Default                     |
    /// |------------------------------|-----------------------------|
    /// | `VIDEO_API_URL`              | `https://api.openai.com/v1` |
    /// | `VIDEO_API_KEY`              | required                    |
    /// | `VIDEO_MODEL`                | `sora-2-pro`                |
    /// | `VIDEO_SIZE`                 | `1792x1024`                 |
    /// | `VIDEO_SECONDS`              | `12`                        |
    /// | `VIDEO_OUTPUT_DIR`           | `./output/videos`           |
    /// | `VIDEO_REQUEST_TIMEOUT_SECS` | `30`                        |
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            base_url: env::var_or("VIDEO_API_URL", "https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            api_key: env::required("VIDEO_API_KEY")?,
            model: env::var_or("VIDEO_MODEL", "sora-2-pro"),
            size: env::var_or("VIDEO_SIZE", "1792x1024"),
            seconds: env::parse_or("VIDEO_SECONDS", 12)?,
            output_dir: PathBuf::from(env::var_or("VIDEO_OUTPUT_DIR", "./output/videos")),
            request_timeout_secs: env::parse_or("VIDEO_REQUEST_TIMEOUT_SECS", 30)?,
        })
    }
}

/// HTTP implementation of [`GenerationProvider`].
pub struct HttpVideoProvider {
    client: reqwest::Client,
    config: VideoApiConfig,
}

#[derive(Debug, Deserialize)]
struct VideoJob {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl HttpVideoProvider {
    pub fn new(config: VideoApiConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, config: VideoApiConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    // ---- private helpers ----

    /// Map a non-2xx response to [`ProviderError`]. 429 becomes
    /// [`ProviderError::RateLimited`] carrying any `Retry-After` seconds.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        response.json::<T>().await.map_err(map_reqwest)
    }
}

fn map_reqwest(e: reqwest::Error) -> ProviderError {
    if e.is_decode() {
        ProviderError::Decode(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// Translate the API's status string. Unknown values are treated as still
/// running so that a new intermediate state never fails a job.
fn remote_status(job: &VideoJob) -> RemoteStatus {
    match job.status.as_deref() {
        Some("completed") => RemoteStatus::Completed,
        Some("failed") | Some("cancelled") => RemoteStatus::Failed {
            reason: job
                .error
                .as_ref()
                .map(error_message)
                .unwrap_or_else(|| "generation failed".to_string()),
        },
        Some("queued") | None => RemoteStatus::Queued,
        Some(_) => RemoteStatus::InProgress,
    }
}

fn error_message(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

#[async_trait]
impl GenerationProvider for HttpVideoProvider {
    async fn submit(&self, prompt: &ScenePrompt) -> Result<String, ProviderError> {
        let seconds = prompt.duration_secs.unwrap_or(self.config.seconds);
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt.prompt,
            "size": self.config.size,
            "seconds": seconds.to_string(),
        });

        let response = self
            .client
            .post(self.url("/videos"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let job: VideoJob = Self::parse_response(response).await?;
        tracing::debug!(job_id = %job.id, scene_index = prompt.scene_index, "Video job created");
        Ok(job.id)
    }

    async fn status(&self, job_id: &str) -> Result<StatusReport, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/videos/{job_id}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(map_reqwest)?;

        let job: VideoJob = Self::parse_response(response).await?;
        let mut report = StatusReport::new(remote_status(&job));
        if let Some(p) = job.progress {
            report = report.with_progress(p.clamp(0.0, 100.0) as u8);
        }
        Ok(report)
    }

    async fn fetch(&self, job_id: &str) -> Result<OutputRef, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/videos/{job_id}/content")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(map_reqwest)?;
        let response = Self::ensure_success(response).await?;

        let io_err = |e: std::io::Error| ProviderError::Io(e.to_string());
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(io_err)?;

        let target = self.config.output_dir.join(format!("{job_id}.mp4"));

        // Dropping `partial` on any early return deletes it.
        let partial = tempfile::NamedTempFile::new_in(&self.config.output_dir).map_err(io_err)?;
        let mut file = tokio::fs::File::from_std(partial.as_file().try_clone().map_err(io_err)?);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        drop(file);

        partial.persist(&target).map_err(|e| io_err(e.error))?;
        tracing::debug!(job_id, bytes = written, path = %target.display(), "Video downloaded");
        Ok(target.to_string_lossy().into_owned())
    }
}
