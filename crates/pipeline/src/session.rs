//! Session manager and registry.
//!
//! [`SessionManager::start`] creates a session, registers it in the
//! injected [`SessionRegistry`] and spawns one task that drives its
//! [`StageSequencer`]. Sessions share no mutable state: each owns its
//! ledger, event bus and stop signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use adclone_core::error::CoreError;
use adclone_core::event_kinds::{Severity, EVENT_SESSION_CANCELLED};
use adclone_core::provider::GenerationProvider;
use adclone_core::status::{Lifecycle, SessionStatus};
use adclone_core::types::{new_session_id, SessionId, Timestamp};
use adclone_core::variant::{resolve_levels, VariantLevel};
use adclone_events::{PipelineEvent, ProgressLedger, SessionSnapshot, SnapshotStore};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::collaborators::Collaborators;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::sequencer::StageSequencer;
use crate::stop::{StopReason, StopSignal};

/// How long [`SessionManager::shutdown`] waits for each session task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One registered session.
pub struct SessionHandle {
    ledger: Arc<ProgressLedger>,
    stop: StopSignal,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn ledger(&self) -> &Arc<ProgressLedger> {
        &self.ledger
    }
}

/// Sessions known to this process, keyed by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn insert(&self, handle: Arc<SessionHandle>) {
        let id = handle.ledger.session_id();
        self.sessions.write().await.insert(id, handle);
    }

    async fn all(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().await.values().cloned().collect()
    }
}

/// Row returned by [`SessionManager::list`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub input_reference: String,
    pub status: SessionStatus,
    pub levels: Vec<VariantLevel>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
}

impl From<&SessionSnapshot> for SessionSummary {
    fn from(s: &SessionSnapshot) -> Self {
        Self {
            id: s.id,
            input_reference: s.input_reference.clone(),
            status: s.status,
            levels: s.levels.clone(),
            created_at: s.created_at,
            completed_at: s.completed_at,
            error: s.error.clone(),
        }
    }
}

/// Entry point for starting, observing and cancelling sessions.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn SnapshotStore>,
    collaborators: Collaborators,
    provider: Arc<dyn GenerationProvider>,
    config: Arc<PipelineConfig>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn SnapshotStore>,
        collaborators: Collaborators,
        provider: Arc<dyn GenerationProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            collaborators,
            provider,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create a session and start running it in the background.
    ///
    /// An empty `levels` slice requests every variant level.
    pub async fn start(
        &self,
        input_reference: &str,
        levels: &[VariantLevel],
    ) -> Result<SessionId, PipelineError> {
        let input_reference = input_reference.trim();
        if input_reference.is_empty() {
            return Err(CoreError::Validation("input_reference must not be empty".into()).into());
        }
        let levels = resolve_levels(levels)?;

        let id = new_session_id();
        let snapshot = SessionSnapshot::new(id, input_reference, levels, Utc::now());
        let ledger = Arc::new(ProgressLedger::create(snapshot, self.store.clone()).await?);
        let stop = StopSignal::new();

        let handle = Arc::new(SessionHandle {
            ledger: ledger.clone(),
            stop: stop.clone(),
            task: Mutex::new(None),
        });
        self.registry.insert(handle.clone()).await;

        let sequencer = StageSequencer::new(
            ledger.clone(),
            self.collaborators.clone(),
            self.provider.clone(),
            self.config.clone(),
            stop.clone(),
        );
        let deadline = self.config.session_deadline;
        let task = tokio::spawn(async move {
            drive(sequencer, ledger, stop, deadline).await;
        });
        *handle.task.lock().await = Some(task);

        tracing::info!(session_id = %id, input = %input_reference, "Session created");
        Ok(id)
    }

    /// Current hierarchical status of a session.
    pub async fn get_status(&self, id: SessionId) -> Result<SessionSnapshot, PipelineError> {
        Ok(self.handle(id).await?.ledger.snapshot().await)
    }

    /// Live events of a session from now on.
    pub async fn subscribe(
        &self,
        id: SessionId,
    ) -> Result<broadcast::Receiver<PipelineEvent>, PipelineError> {
        Ok(self.handle(id).await?.ledger.subscribe())
    }

    /// Recorded events after `cursor` plus a live receiver for the rest.
    pub async fn subscribe_from(
        &self,
        id: SessionId,
        cursor: u64,
    ) -> Result<(Vec<PipelineEvent>, broadcast::Receiver<PipelineEvent>), PipelineError> {
        Ok(self.handle(id).await?.ledger.subscribe_from(cursor).await)
    }

    pub async fn events_after(
        &self,
        id: SessionId,
        cursor: u64,
    ) -> Result<Vec<PipelineEvent>, PipelineError> {
        Ok(self.handle(id).await?.ledger.events_after(cursor).await)
    }

    /// Stop a running session. Jobs already accepted by the provider are
    /// left to finish remotely; their results are discarded.
    pub async fn cancel(&self, id: SessionId) -> Result<(), PipelineError> {
        let handle = self.handle(id).await?;
        let snapshot = handle.ledger.snapshot().await;
        if snapshot.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Session {id} is already {}",
                snapshot.status.as_str()
            ))
            .into());
        }
        if handle.stop.is_stopped() {
            return Err(CoreError::Conflict(format!("Session {id} is already stopping")).into());
        }

        handle
            .ledger
            .publish(
                PipelineEvent::new(EVENT_SESSION_CANCELLED, "Session cancellation requested")
                    .with_severity(Severity::Warning),
            )
            .await?;
        handle.stop.stop(StopReason::Cancelled);
        tracing::info!(session_id = %id, "Session cancellation requested");
        Ok(())
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.registry.len().await
    }

    /// Summaries of every registered session, newest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for handle in self.registry.all().await {
            summaries.push(SessionSummary::from(&handle.ledger.snapshot().await));
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Register persisted sessions after a restart. Sessions that were
    /// still running are marked failed with a `session_interrupted` event.
    ///
    /// Returns the number of sessions restored.
    pub async fn restore(&self) -> Result<usize, PipelineError> {
        let records = self.store.load_all().await?;
        let mut restored = 0;
        for record in records {
            let id = record.snapshot.id;
            if self.registry.contains(id).await {
                continue;
            }
            let ledger = Arc::new(ProgressLedger::from_record(record, self.store.clone()));
            if ledger.interrupt().await?.is_some() {
                tracing::warn!(session_id = %id, "Session interrupted by restart");
            }
            self.registry
                .insert(Arc::new(SessionHandle {
                    ledger,
                    stop: StopSignal::new(),
                    task: Mutex::new(None),
                }))
                .await;
            restored += 1;
        }
        tracing::info!(count = restored, "Sessions restored");
        Ok(restored)
    }

    /// Wait until a session is terminal and return its final snapshot.
    pub async fn wait(&self, id: SessionId) -> Result<SessionSnapshot, PipelineError> {
        let handle = self.handle(id).await?;
        let mut events = handle.ledger.subscribe();
        loop {
            let snapshot = handle.ledger.snapshot().await;
            if snapshot.is_terminal() {
                return Ok(snapshot);
            }
            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Ok(handle.ledger.snapshot().await),
            }
        }
    }

    /// Cancel every running session and wait briefly for each task.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down session manager");
        for handle in self.registry.all().await {
            handle.stop.stop(StopReason::Cancelled);
            let task = handle.task.lock().await.take();
            if let Some(task) = task {
                let id = handle.ledger.session_id();
                if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                    tracing::warn!(session_id = %id, "Session task did not stop in time");
                }
            }
        }
    }

    async fn handle(&self, id: SessionId) -> Result<Arc<SessionHandle>, PipelineError> {
        self.registry
            .get(id)
            .await
            .ok_or(PipelineError::SessionNotFound(id))
    }
}

/// Run a session to the end, enforcing its deadline, and record a failure
/// as the session's terminal state.
async fn drive(
    sequencer: StageSequencer,
    ledger: Arc<ProgressLedger>,
    stop: StopSignal,
    deadline: Option<Duration>,
) {
    let id = ledger.session_id();
    let run = sequencer.run();
    tokio::pin!(run);

    let result = match deadline {
        Some(limit) => {
            tokio::select! {
                result = &mut run => result,
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!(session_id = %id, deadline_secs = limit.as_secs(), "Session deadline exceeded");
                    stop.stop(StopReason::DeadlineExceeded);
                    run.await
                }
            }
        }
        None => run.await,
    };

    if let Err(e) = result {
        tracing::error!(session_id = %id, error = %e, "Session failed");
        if let Err(e) = ledger.fail_session(e.kind(), &e.to_string()).await {
            tracing::error!(session_id = %id, error = %e, "Failed to record session failure");
        }
    }
}
