//! Remote generation provider seam.
//!
//! A provider accepts one [`ScenePrompt`], returns its own job id, reports
//! status on request and finally hands over the generated output. The
//! scheduler wraps these calls with retry, deadline and cancellation policy.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::collaborators::ScenePrompt;
use crate::types::{OutputRef, Timestamp};

/// Status as reported by the provider for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    Queued,
    InProgress,
    Completed,
    Failed { reason: String },
}

/// One status poll result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RemoteStatus,
    /// Completion percentage (0-100) if the provider reports one.
    pub progress: Option<u8>,
}

impl StatusReport {
    pub fn new(status: RemoteStatus) -> Self {
        Self {
            status,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }
}

/// Retry bookkeeping for the call currently being made on a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
    /// Consecutive transient failures of the current call.
    pub attempt: u32,
    pub next_retry_at: Option<Timestamp>,
}

/// Locally tracked handle for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Provider-assigned id.
    pub job_id: String,
    pub created_at: Timestamp,
    /// Wall-clock deadline after which the job is forced to `timed_out`.
    pub deadline: Timestamp,
    #[serde(default)]
    pub backoff: BackoffState,
}

/// Errors from a provider call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network, DNS, TLS or timeout failure.
    #[error("Provider transport error: {0}")]
    Transport(String),

    /// The provider asked us to slow down.
    #[error("Provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    /// Non-2xx response other than rate limiting.
    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    /// Writing fetched output failed.
    #[error("Output I/O error: {0}")]
    Io(String),
}

impl ProviderError {
    /// Transient errors are retried with backoff; everything else fails
    /// the scene immediately.
    ///
    /// Transient: transport failures, rate limiting, HTTP 408 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status == 408 || *status >= 500,
            Self::Decode(_) | Self::Io(_) => false,
        }
    }
}

/// A remote, asynchronous generation service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Submit one unit of work. Returns the provider-assigned job id.
    async fn submit(&self, prompt: &ScenePrompt) -> Result<String, ProviderError>;

    /// Current status of a submitted job.
    async fn status(&self, job_id: &str) -> Result<StatusReport, ProviderError>;

    /// Retrieve the output of a completed job.
    async fn fetch(&self, job_id: &str) -> Result<OutputRef, ProviderError>;
}
