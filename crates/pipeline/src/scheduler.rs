//! Job scheduler and poller for the scenes of one variant.
//!
//! Each scene is one remote job. [`JobScheduler::run_scene`] waits for an
//! in-flight slot, submits the job, polls it on a fixed interval until it
//! is terminal, fetches the output and records every step in the ledger.
//!
//! - Transient provider errors (submit, status or fetch) are retried with
//!   exponential backoff; once the budget is spent the scene fails.
//! - A job still running at its deadline is forced to `timed_out`.
//! - The stop signal is checked before each submission and each poll.
//!   Stopping never retracts a submitted remote job; its result is
//!   discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use adclone_core::backoff::RetryPolicy;
use adclone_core::collaborators::ScenePrompt;
use adclone_core::event_kinds::ErrorKind;
use adclone_core::provider::{GenerationProvider, JobHandle, ProviderError, RemoteStatus};
use adclone_core::types::{OutputRef, SceneIndex};
use adclone_core::variant::VariantLevel;
use adclone_events::ProgressLedger;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::stop::{StopReason, StopSignal};

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(OutputRef),
    Failed(String),
    TimedOut(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Scheduler timing and retry settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_in_flight: usize,
    pub poll_interval: Duration,
    pub job_deadline: Duration,
    pub retry: RetryPolicy,
}

impl From<&PipelineConfig> for SchedulerSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight.max(1),
            poll_interval: config.poll_interval,
            job_deadline: config.job_deadline,
            retry: config.retry.clone(),
        }
    }
}

/// Why a provider call gave up.
enum CallError {
    Provider { error: ProviderError, attempts: u32 },
    Stopped(StopReason),
    Deadline,
    Ledger(PipelineError),
}

/// A job handle together with its monotonic deadline.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub index: SceneIndex,
    pub handle: JobHandle,
    deadline: Instant,
}

/// Submits and polls the scenes of one variant, at most
/// `max_in_flight` at a time.
pub struct JobScheduler {
    level: VariantLevel,
    provider: Arc<dyn GenerationProvider>,
    ledger: Arc<ProgressLedger>,
    settings: SchedulerSettings,
    slots: Arc<Semaphore>,
    stop: StopSignal,
}

impl JobScheduler {
    pub fn new(
        level: VariantLevel,
        provider: Arc<dyn GenerationProvider>,
        ledger: Arc<ProgressLedger>,
        settings: SchedulerSettings,
        stop: StopSignal,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
        Self {
            level,
            provider,
            ledger,
            settings,
            slots,
            stop,
        }
    }

    /// Drive one scene to a terminal state and record it.
    ///
    /// Only ledger failures surface as `Err`; every job failure is an
    /// [`JobOutcome`] already recorded on the scene.
    pub async fn run_scene(&self, prompt: ScenePrompt) -> Result<JobOutcome, PipelineError> {
        let index = prompt.scene_index;

        let _permit = tokio::select! {
            biased;
            _ = self.stop.stopped() => return self.record_stopped(index).await,
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return self
                        .record_failure(index, ErrorKind::JobFailedError, "scheduler closed".into())
                        .await
                }
            },
        };

        let job = match self.submit(&prompt).await? {
            Ok(job) => job,
            Err(outcome) => return Ok(outcome),
        };
        self.await_terminal(&job).await
    }

    /// Submit one job, retrying transient errors.
    ///
    /// The outer `Result` carries ledger failures; the inner `Err` is the
    /// recorded terminal outcome of a scene that never got submitted.
    pub async fn submit(
        &self,
        prompt: &ScenePrompt,
    ) -> Result<Result<TrackedJob, JobOutcome>, PipelineError> {
        let index = prompt.scene_index;
        if let Some(reason) = self.stop.reason() {
            return self.record_stop_reason(index, reason).await.map(Err);
        }

        let provider = self.provider.clone();
        let submitted = self
            .call_with_retry(index, "submit", None, || {
                let provider = provider.clone();
                let prompt = prompt.clone();
                async move { provider.submit(&prompt).await }
            })
            .await;

        let job_id = match submitted {
            Ok(id) => id,
            Err(e) => return self.record_call_error(index, "submit", e).await.map(Err),
        };

        let now = Utc::now();
        let deadline = chrono::Duration::from_std(self.settings.job_deadline)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
        let handle = JobHandle {
            job_id: job_id.clone(),
            created_at: now,
            deadline,
            backoff: Default::default(),
        };
        self.ledger
            .scene_submitted(self.level, index, handle.clone())
            .await?;
        tracing::debug!(
            variant = %self.level,
            scene_index = index,
            job_id = %job_id,
            "Scene job submitted",
        );

        Ok(Ok(TrackedJob {
            index,
            handle,
            deadline: Instant::now() + self.settings.job_deadline,
        }))
    }

    /// Poll `job` until it is terminal, its deadline passes or the session
    /// stops. Records the outcome on the scene.
    pub async fn await_terminal(&self, job: &TrackedJob) -> Result<JobOutcome, PipelineError> {
        let index = job.index;
        let job_id = job.handle.job_id.as_str();
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.settings.poll_interval,
            self.settings.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.stopped() => return self.record_stopped(index).await,
                _ = tokio::time::sleep_until(job.deadline) => return self.record_timeout(index).await,
                _ = ticker.tick() => {}
            }
            if let Some(reason) = self.stop.reason() {
                return self.record_stop_reason(index, reason).await;
            }

            let provider = self.provider.clone();
            let polled = self
                .call_with_retry(index, "status", Some(job.deadline), || {
                    let provider = provider.clone();
                    let job_id = job_id.to_string();
                    async move { provider.status(&job_id).await }
                })
                .await;
            let report = match polled {
                Ok(report) => report,
                Err(e) => return self.record_call_error(index, "status", e).await,
            };
            self.ledger.scene_polled(self.level, index, &report).await?;

            match report.status {
                RemoteStatus::Completed => return self.fetch(job).await,
                RemoteStatus::Failed { reason } => {
                    return self
                        .record_failure(index, ErrorKind::JobFailedError, reason)
                        .await
                }
                RemoteStatus::Queued | RemoteStatus::InProgress => {}
            }
        }
    }

    /// Fetch a completed job's output. A fetch failure fails the scene.
    async fn fetch(&self, job: &TrackedJob) -> Result<JobOutcome, PipelineError> {
        let index = job.index;
        let provider = self.provider.clone();
        let job_id = job.handle.job_id.clone();
        let fetched = self
            .call_with_retry(index, "fetch", Some(job.deadline), || {
                let provider = provider.clone();
                let job_id = job_id.clone();
                async move { provider.fetch(&job_id).await }
            })
            .await;

        match fetched {
            Ok(output) => {
                self.ledger
                    .complete_scene(self.level, index, output.clone())
                    .await?;
                Ok(JobOutcome::Completed(output))
            }
            Err(e) => self.record_call_error(index, "fetch", e).await,
        }
    }

    /// Run `call`, retrying transient errors with backoff. Each retry is
    /// recorded as a `scene_retrying` event.
    async fn call_with_retry<T, F, Fut>(
        &self,
        index: SceneIndex,
        operation: &str,
        deadline: Option<Instant>,
        mut call: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.stop.stopped() => return Err(self.stopped_error()),
                _ = sleep_until_opt(deadline) => return Err(CallError::Deadline),
                result = call() => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_transient() || !self.settings.retry.allows_retry(attempt) {
                return Err(CallError::Provider {
                    error,
                    attempts: attempt,
                });
            }

            let mut delay = self.settings.retry.delay_for_attempt(attempt);
            if let ProviderError::RateLimited {
                retry_after: Some(after),
            } = &error
            {
                delay = delay.max(*after);
            }
            tracing::warn!(
                variant = %self.level,
                scene_index = index,
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient provider error, retrying",
            );
            if let Err(e) = self
                .ledger
                .scene_retrying(self.level, index, operation, attempt, delay, &error.to_string())
                .await
            {
                return Err(CallError::Ledger(e.into()));
            }

            tokio::select! {
                biased;
                _ = self.stop.stopped() => return Err(self.stopped_error()),
                _ = sleep_until_opt(deadline) => return Err(CallError::Deadline),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn stopped_error(&self) -> CallError {
        CallError::Stopped(self.stop.reason().unwrap_or(StopReason::Cancelled))
    }

    // ---- outcome recording ----

    async fn record_call_error(
        &self,
        index: SceneIndex,
        operation: &str,
        error: CallError,
    ) -> Result<JobOutcome, PipelineError> {
        match error {
            CallError::Provider { error, attempts } => {
                let detail = if error.is_transient() {
                    format!("{operation} failed after {attempts} attempts: {error}")
                } else {
                    format!("{operation} failed: {error}")
                };
                self.record_failure(index, ErrorKind::JobFailedError, detail)
                    .await
            }
            CallError::Stopped(reason) => self.record_stop_reason(index, reason).await,
            CallError::Deadline => self.record_timeout(index).await,
            CallError::Ledger(e) => Err(e),
        }
    }

    async fn record_stopped(&self, index: SceneIndex) -> Result<JobOutcome, PipelineError> {
        let reason = self.stop.reason().unwrap_or(StopReason::Cancelled);
        self.record_stop_reason(index, reason).await
    }

    async fn record_stop_reason(
        &self,
        index: SceneIndex,
        reason: StopReason,
    ) -> Result<JobOutcome, PipelineError> {
        match reason {
            StopReason::Cancelled => {
                self.record_failure(index, ErrorKind::Cancelled, "cancelled".into())
                    .await
            }
            StopReason::DeadlineExceeded => {
                let detail = "session deadline exceeded".to_string();
                self.ledger
                    .fail_scene(self.level, index, ErrorKind::JobTimeoutError, &detail)
                    .await?;
                Ok(JobOutcome::TimedOut(detail))
            }
        }
    }

    async fn record_timeout(&self, index: SceneIndex) -> Result<JobOutcome, PipelineError> {
        let detail = format!(
            "job exceeded its {}s deadline",
            self.settings.job_deadline.as_secs()
        );
        tracing::warn!(variant = %self.level, scene_index = index, "Scene job timed out");
        self.ledger
            .fail_scene(self.level, index, ErrorKind::JobTimeoutError, &detail)
            .await?;
        Ok(JobOutcome::TimedOut(detail))
    }

    async fn record_failure(
        &self,
        index: SceneIndex,
        kind: ErrorKind,
        detail: String,
    ) -> Result<JobOutcome, PipelineError> {
        self.ledger
            .fail_scene(self.level, index, kind, &detail)
            .await?;
        Ok(JobOutcome::Failed(detail))
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
