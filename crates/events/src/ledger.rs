//! The progress ledger: single writer for one session.
//!
//! Every mutation goes through [`ProgressLedger::apply`], which, under the
//! session's lock:
//!
//! 1. applies the change to a copy of the current record,
//! 2. appends exactly one event to the copy's log,
//! 3. persists the copy through the [`SnapshotStore`],
//! 4. swaps the copy in and publishes the event on the bus.
//!
//! If validation or persistence fails, the in-memory record is left
//! untouched, so memory and disk never disagree. Ledgers of different
//! sessions share nothing.

use std::sync::Arc;
use std::time::Duration;

use adclone_core::event_kinds::{
    ErrorKind, Severity, EVENT_EVALUATION_COMPLETED, EVENT_EVALUATION_FAILED,
    EVENT_SCENE_COMPLETED, EVENT_SCENE_FAILED, EVENT_SCENE_PROGRESS, EVENT_SCENE_RETRYING,
    EVENT_SCENE_SUBMITTED, EVENT_SCENE_TIMED_OUT, EVENT_SESSION_COMPLETED, EVENT_SESSION_FAILED,
    EVENT_SESSION_INTERRUPTED, EVENT_SESSION_STARTED, EVENT_STAGE_COMPLETED,
    EVENT_STAGE_DEGRADED, EVENT_STAGE_FAILED, EVENT_STAGE_STARTED, EVENT_VARIANT_ASSEMBLING,
    EVENT_VARIANT_COMPLETED, EVENT_VARIANT_FAILED, EVENT_VARIANT_STARTED,
};
use adclone_core::provider::{JobHandle, StatusReport};
use adclone_core::stage::StageName;
use adclone_core::status::{Lifecycle, SceneStatus, SessionStatus, StageStatus, VariantStatus};
use adclone_core::types::{ArtifactRef, OutputRef, SceneIndex, SessionId, Timestamp};
use adclone_core::variant::VariantLevel;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};

use crate::bus::{EventBus, PipelineEvent};
use crate::error::LedgerError;
use crate::persistence::SnapshotStore;
use crate::snapshot::{SceneRecord, SessionRecord, SessionSnapshot, VariantRecord};

/// Authoritative status and event log of one session.
pub struct ProgressLedger {
    id: SessionId,
    state: Mutex<SessionRecord>,
    bus: EventBus,
    store: Arc<dyn SnapshotStore>,
}

impl ProgressLedger {
    /// Create a ledger for a new session and persist its initial record.
    pub async fn create(
        snapshot: SessionSnapshot,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, LedgerError> {
        let record = SessionRecord::new(snapshot);
        store.save(&record).await?;
        Ok(Self::from_record(record, store))
    }

    /// Wrap a record loaded from a store.
    pub fn from_record(record: SessionRecord, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            id: record.snapshot.id,
            state: Mutex::new(record),
            bus: EventBus::default(),
            store,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.id
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot.clone()
    }

    pub async fn record(&self) -> SessionRecord {
        self.state.lock().await.clone()
    }

    /// Events with a cursor strictly greater than `cursor`.
    pub async fn events_after(&self, cursor: u64) -> Vec<PipelineEvent> {
        let state = self.state.lock().await;
        state
            .events
            .iter()
            .filter(|e| e.cursor > cursor)
            .cloned()
            .collect()
    }

    /// Live events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.bus.subscribe()
    }

    /// Backlog after `cursor` plus a live receiver, taken under the lock
    /// so that no event falls between the two.
    pub async fn subscribe_from(
        &self,
        cursor: u64,
    ) -> (Vec<PipelineEvent>, broadcast::Receiver<PipelineEvent>) {
        let state = self.state.lock().await;
        let backlog = state
            .events
            .iter()
            .filter(|e| e.cursor > cursor)
            .cloned()
            .collect();
        (backlog, self.bus.subscribe())
    }

    // -----------------------------------------------------------------------
    // Core mutation path
    // -----------------------------------------------------------------------

    /// Append an event that carries no snapshot change.
    pub async fn publish(&self, event: PipelineEvent) -> Result<PipelineEvent, LedgerError> {
        self.apply(event, |_, _| Ok(())).await
    }

    /// Apply `mutate` and append `event` as one atomic step.
    async fn apply<F>(&self, mut event: PipelineEvent, mutate: F) -> Result<PipelineEvent, LedgerError>
    where
        F: FnOnce(&mut SessionSnapshot, Timestamp) -> Result<(), LedgerError>,
    {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut next = state.clone();
        mutate(&mut next.snapshot, now)?;

        event.cursor = next.last_cursor() + 1;
        event.session_id = self.id;
        event.timestamp = now;
        next.events.push(event.clone());

        self.store.save(&next).await?;
        *state = next;

        self.bus.publish(event.clone());
        trace_event(&event);
        Ok(event)
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    pub async fn start_session(&self) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(EVENT_SESSION_STARTED, "Session started");
        self.apply(event, |snap, _| {
            set_session_status(snap, SessionStatus::Running)
        })
        .await
    }

    /// Mark the session completed. Every stage must be completed and every
    /// variant terminal.
    pub async fn complete_session(&self) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(EVENT_SESSION_COMPLETED, "Session completed");
        self.apply(event, |snap, now| {
            if let Some(stage) = snap.stages.iter().find(|s| s.status != StageStatus::Completed) {
                return Err(LedgerError::Invariant(format!(
                    "stage {} is {} at session completion",
                    stage.name,
                    stage.status.as_str()
                )));
            }
            if let Some(v) = snap.variants.iter().find(|v| !v.status.is_terminal()) {
                return Err(LedgerError::Invariant(format!(
                    "variant {} is {} at session completion",
                    v.level,
                    v.status.as_str()
                )));
            }
            set_session_status(snap, SessionStatus::Completed)?;
            snap.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    /// Mark the session failed, closing any open stage, variant or scene.
    pub async fn fail_session(
        &self,
        kind: ErrorKind,
        error: &str,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(EVENT_SESSION_FAILED, format!("Session failed: {error}"))
            .with_severity(Severity::Error)
            .with_error(kind, error);
        let error = error.to_string();
        let forced = match kind {
            ErrorKind::JobTimeoutError => SceneStatus::TimedOut,
            _ => SceneStatus::Failed,
        };
        self.apply(event, move |snap, now| {
            close_open_work(snap, forced, &error, now);
            set_session_status(snap, SessionStatus::Failed)?;
            snap.error = Some(error);
            snap.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    /// Fail a session found non-terminal after a restart.
    ///
    /// Returns `Ok(None)` when the session was already terminal.
    pub async fn interrupt(&self) -> Result<Option<PipelineEvent>, LedgerError> {
        if self.state.lock().await.snapshot.is_terminal() {
            return Ok(None);
        }
        let reason = "interrupted by process restart";
        let event = PipelineEvent::new(EVENT_SESSION_INTERRUPTED, "Session interrupted")
            .with_severity(Severity::Error)
            .with_field("error", reason);
        self.apply(event, move |snap, now| {
            close_open_work(snap, SceneStatus::Failed, reason, now);
            if snap.status == SessionStatus::Pending || snap.status == SessionStatus::Running {
                snap.status = SessionStatus::Failed;
            }
            snap.error = Some(reason.to_string());
            snap.completed_at = Some(now);
            Ok(())
        })
        .await
        .map(Some)
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    pub async fn start_stage(&self, stage: StageName) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(EVENT_STAGE_STARTED, format!("Stage {stage} started"))
            .with_stage(stage);
        self.apply(event, move |snap, now| {
            set_stage_status(snap, stage, StageStatus::InProgress)?;
            if let Some(record) = snap.stage_mut(stage) {
                record.started_at = Some(now);
            }
            snap.current_stage = Some(stage);
            Ok(())
        })
        .await
    }

    pub async fn complete_stage(
        &self,
        stage: StageName,
        result: serde_json::Value,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(EVENT_STAGE_COMPLETED, format!("Stage {stage} completed"))
            .with_stage(stage);
        self.apply(event, move |snap, now| finish_stage(snap, stage, result, now))
            .await
    }

    /// Complete a soft stage with its fallback value after a failure.
    pub async fn degrade_stage(
        &self,
        stage: StageName,
        error: &str,
        fallback: serde_json::Value,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_STAGE_DEGRADED,
            format!("Stage {stage} failed, continuing with fallback"),
        )
        .with_severity(Severity::Warning)
        .with_stage(stage)
        .with_error(ErrorKind::SoftStageError, error);
        let error = error.to_string();
        self.apply(event, move |snap, now| {
            finish_stage(snap, stage, fallback, now)?;
            if let Some(record) = snap.stage_mut(stage) {
                record.degraded = true;
                record.error = Some(error);
            }
            Ok(())
        })
        .await
    }

    pub async fn fail_stage(
        &self,
        stage: StageName,
        kind: ErrorKind,
        error: &str,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(EVENT_STAGE_FAILED, format!("Stage {stage} failed: {error}"))
            .with_severity(Severity::Error)
            .with_stage(stage)
            .with_error(kind, error);
        let error = error.to_string();
        self.apply(event, move |snap, now| {
            set_stage_status(snap, stage, StageStatus::Failed)?;
            if let Some(record) = snap.stage_mut(stage) {
                record.completed_at = Some(now);
                record.error = Some(error);
            }
            Ok(())
        })
        .await
    }

    /// Complete `plan-variants` and create one pending variant per level.
    pub async fn plan_variants(
        &self,
        levels: &[VariantLevel],
        result: serde_json::Value,
    ) -> Result<PipelineEvent, LedgerError> {
        let stage = StageName::PlanVariants;
        let levels = levels.to_vec();
        let event = PipelineEvent::new(
            EVENT_STAGE_COMPLETED,
            format!("Stage {stage} completed with {} variants", levels.len()),
        )
        .with_stage(stage)
        .with_field(
            "variants",
            levels.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
        );
        self.apply(event, move |snap, now| {
            if !snap.variants.is_empty() {
                return Err(LedgerError::Invariant("variants already planned".into()));
            }
            finish_stage(snap, stage, result, now)?;
            snap.variants = levels.into_iter().map(VariantRecord::pending).collect();
            Ok(())
        })
        .await
    }

    /// Complete `build-prompts` and create queued scenes for each variant.
    pub async fn plan_scenes(
        &self,
        scene_counts: &[(VariantLevel, usize)],
        result: serde_json::Value,
    ) -> Result<PipelineEvent, LedgerError> {
        let stage = StageName::BuildPrompts;
        let counts = scene_counts.to_vec();
        let total: usize = counts.iter().map(|(_, n)| n).sum();
        let event = PipelineEvent::new(
            EVENT_STAGE_COMPLETED,
            format!("Stage {stage} completed with {total} scenes"),
        )
        .with_stage(stage)
        .with_field("scenes", total);
        self.apply(event, move |snap, now| {
            for (level, count) in &counts {
                let variant = variant_mut(snap, *level)?;
                if !variant.scenes.is_empty() {
                    return Err(LedgerError::Invariant(format!(
                        "scenes for variant {level} already planned"
                    )));
                }
                variant.scenes = (0..*count).map(SceneRecord::queued).collect();
            }
            finish_stage(snap, stage, result, now)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Variants
    // -----------------------------------------------------------------------

    pub async fn start_variant(&self, level: VariantLevel) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(EVENT_VARIANT_STARTED, format!("Variant {level} generating"))
            .with_variant(level);
        self.apply(event, move |snap, now| {
            let variant = variant_mut(snap, level)?;
            set_variant_status(variant, VariantStatus::Generating)?;
            variant.started_at = Some(now);
            Ok(())
        })
        .await
    }

    /// Move a variant to `assembling`. Refused unless every owned scene is
    /// completed.
    pub async fn begin_assembly(&self, level: VariantLevel) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_VARIANT_ASSEMBLING,
            format!("Variant {level} assembling"),
        )
        .with_variant(level);
        self.apply(event, move |snap, _| {
            let variant = variant_mut(snap, level)?;
            if !variant.all_scenes_completed() {
                return Err(LedgerError::Invariant(format!(
                    "variant {level} cannot assemble before every scene completed"
                )));
            }
            set_variant_status(variant, VariantStatus::Assembling)
        })
        .await
    }

    pub async fn complete_variant(
        &self,
        level: VariantLevel,
        artifact: ArtifactRef,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_VARIANT_COMPLETED,
            format!("Variant {level} completed"),
        )
        .with_variant(level)
        .with_field("artifact", artifact.clone());
        self.apply(event, move |snap, now| {
            let variant = variant_mut(snap, level)?;
            set_variant_status(variant, VariantStatus::Completed)?;
            variant.artifact = Some(artifact);
            variant.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    pub async fn fail_variant(
        &self,
        level: VariantLevel,
        kind: ErrorKind,
        error: &str,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_VARIANT_FAILED,
            format!("Variant {level} failed: {error}"),
        )
        .with_severity(Severity::Error)
        .with_variant(level)
        .with_error(kind, error);
        let error = error.to_string();
        self.apply(event, move |snap, now| {
            let variant = variant_mut(snap, level)?;
            set_variant_status(variant, VariantStatus::Failed)?;
            variant.error = Some(error);
            variant.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    /// Fail a variant because some of its scenes did not complete.
    ///
    /// The scenes already carry their own error events, so this one only
    /// lists them and has no error kind.
    pub async fn abandon_variant(
        &self,
        level: VariantLevel,
        failed_scenes: &[SceneIndex],
        reason: &str,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_VARIANT_FAILED,
            format!("Variant {level} failed: {reason}"),
        )
        .with_severity(Severity::Error)
        .with_variant(level)
        .with_field("failed_scenes", failed_scenes.to_vec())
        .with_field("reason", reason);
        let reason = reason.to_string();
        self.apply(event, move |snap, now| {
            let variant = variant_mut(snap, level)?;
            set_variant_status(variant, VariantStatus::Failed)?;
            variant.error = Some(reason);
            variant.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    pub async fn record_score(
        &self,
        level: VariantLevel,
        score: f64,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_EVALUATION_COMPLETED,
            format!("Variant {level} scored {score:.2}"),
        )
        .with_stage(StageName::Evaluate)
        .with_variant(level)
        .with_field("score", score);
        self.apply(event, move |snap, _| {
            variant_mut(snap, level)?.score = Some(score);
            Ok(())
        })
        .await
    }

    /// Record a failed evaluation and its fallback score.
    pub async fn record_evaluation_failure(
        &self,
        level: VariantLevel,
        error: &str,
        fallback: Option<f64>,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_EVALUATION_FAILED,
            format!("Evaluation of variant {level} failed: {error}"),
        )
        .with_severity(Severity::Warning)
        .with_stage(StageName::Evaluate)
        .with_variant(level)
        .with_error(ErrorKind::EvaluationError, error)
        .with_field("fallback_score", fallback);
        self.apply(event, move |snap, _| {
            variant_mut(snap, level)?.score = fallback;
            Ok(())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Scenes
    // -----------------------------------------------------------------------

    pub async fn scene_submitted(
        &self,
        level: VariantLevel,
        index: SceneIndex,
        handle: JobHandle,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_SCENE_SUBMITTED,
            format!("Scene {index} of {level} submitted as job {}", handle.job_id),
        )
        .with_scene(level, index)
        .with_field("job_id", handle.job_id.clone())
        .with_field("deadline", handle.deadline.to_rfc3339());
        self.apply(event, move |snap, _| {
            let scene = scene_mut(snap, level, index)?;
            set_scene_status(level, scene, SceneStatus::Submitted)?;
            scene.job = Some(handle);
            Ok(())
        })
        .await
    }

    /// Record one successful status poll. The first poll moves the scene
    /// from `submitted` to `polling`. Polls that report no new progress are
    /// logged at debug severity.
    pub async fn scene_polled(
        &self,
        level: VariantLevel,
        index: SceneIndex,
        report: &StatusReport,
    ) -> Result<PipelineEvent, LedgerError> {
        let (previous, attempts) = {
            let state = self.state.lock().await;
            let scene = state
                .snapshot
                .variant(level)
                .and_then(|v| v.scene(index))
                .ok_or_else(|| unknown_scene(level, index))?;
            (scene.progress, scene.poll_attempts + 1)
        };
        let progress = report.progress.or(previous);
        let severity = if progress != previous {
            Severity::Info
        } else {
            Severity::Debug
        };
        let event = PipelineEvent::new(
            EVENT_SCENE_PROGRESS,
            format!(
                "Scene {index} of {level} at {}%",
                progress.map(|p| p.to_string()).unwrap_or_else(|| "?".into())
            ),
        )
        .with_severity(severity)
        .with_scene(level, index)
        .with_field("progress", progress)
        .with_field("poll_attempt", attempts)
        .with_field("remote_status", serde_json::to_value(&report.status)?);
        self.apply(event, move |snap, now| {
            let scene = scene_mut(snap, level, index)?;
            if scene.status == SceneStatus::Submitted {
                set_scene_status(level, scene, SceneStatus::Polling)?;
            }
            scene.poll_attempts += 1;
            scene.last_checked_at = Some(now);
            scene.progress = progress;
            if let Some(job) = scene.job.as_mut() {
                job.backoff = Default::default();
            }
            Ok(())
        })
        .await
    }

    /// Record a transient provider error that will be retried after `delay`.
    pub async fn scene_retrying(
        &self,
        level: VariantLevel,
        index: SceneIndex,
        operation: &str,
        attempt: u32,
        delay: Duration,
        error: &str,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_SCENE_RETRYING,
            format!("Scene {index} of {level}: {operation} failed (attempt {attempt}), retrying"),
        )
        .with_severity(Severity::Warning)
        .with_scene(level, index)
        .with_error(ErrorKind::TransientProviderError, error)
        .with_field("operation", operation)
        .with_field("attempt", attempt)
        .with_field("delay_ms", delay.as_millis() as u64);
        self.apply(event, move |snap, now| {
            let scene = scene_mut(snap, level, index)?;
            let next_retry_at = chrono::Duration::from_std(delay)
                .ok()
                .map(|d| now + d);
            match scene.job.as_mut() {
                Some(job) => {
                    job.backoff.attempt = attempt;
                    job.backoff.next_retry_at = next_retry_at;
                }
                None => scene.submit_attempts = attempt,
            }
            Ok(())
        })
        .await
    }

    pub async fn complete_scene(
        &self,
        level: VariantLevel,
        index: SceneIndex,
        output: OutputRef,
    ) -> Result<PipelineEvent, LedgerError> {
        let event = PipelineEvent::new(
            EVENT_SCENE_COMPLETED,
            format!("Scene {index} of {level} completed"),
        )
        .with_scene(level, index)
        .with_field("output", output.clone());
        self.apply(event, move |snap, now| {
            let scene = scene_mut(snap, level, index)?;
            set_scene_status(level, scene, SceneStatus::Completed)?;
            scene.output = Some(output);
            scene.progress = Some(100);
            scene.last_checked_at = Some(now);
            refresh_generation_progress(snap);
            Ok(())
        })
        .await
    }

    /// Fail a scene. [`ErrorKind::JobTimeoutError`] ends it `timed_out`,
    /// every other kind ends it `failed`.
    pub async fn fail_scene(
        &self,
        level: VariantLevel,
        index: SceneIndex,
        kind: ErrorKind,
        error: &str,
    ) -> Result<PipelineEvent, LedgerError> {
        let (status, event_type) = match kind {
            ErrorKind::JobTimeoutError => (SceneStatus::TimedOut, EVENT_SCENE_TIMED_OUT),
            _ => (SceneStatus::Failed, EVENT_SCENE_FAILED),
        };
        let event = PipelineEvent::new(
            event_type,
            format!("Scene {index} of {level} {}: {error}", status.as_str()),
        )
        .with_severity(Severity::Error)
        .with_scene(level, index)
        .with_error(kind, error);
        let error = error.to_string();
        self.apply(event, move |snap, now| {
            let scene = scene_mut(snap, level, index)?;
            set_scene_status(level, scene, status)?;
            scene.error = Some(error);
            scene.last_checked_at = Some(now);
            refresh_generation_progress(snap);
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Mutation helpers
// ---------------------------------------------------------------------------

fn set_session_status(snap: &mut SessionSnapshot, to: SessionStatus) -> Result<(), LedgerError> {
    snap.status
        .validate_transition(to)
        .map_err(|source| LedgerError::Transition {
            entity: format!("session {}", snap.id),
            source,
        })?;
    snap.status = to;
    Ok(())
}

fn set_stage_status(
    snap: &mut SessionSnapshot,
    stage: StageName,
    to: StageStatus,
) -> Result<(), LedgerError> {
    let record = snap.stage_mut(stage).ok_or_else(|| LedgerError::Unknown {
        entity: "stage",
        id: stage.to_string(),
    })?;
    record
        .status
        .validate_transition(to)
        .map_err(|source| LedgerError::Transition {
            entity: format!("stage {stage}"),
            source,
        })?;
    record.status = to;
    Ok(())
}

fn finish_stage(
    snap: &mut SessionSnapshot,
    stage: StageName,
    result: serde_json::Value,
    now: Timestamp,
) -> Result<(), LedgerError> {
    set_stage_status(snap, stage, StageStatus::Completed)?;
    if let Some(record) = snap.stage_mut(stage) {
        record.progress = 100;
        record.completed_at = Some(now);
        record.result = result;
    }
    Ok(())
}

fn set_variant_status(variant: &mut VariantRecord, to: VariantStatus) -> Result<(), LedgerError> {
    variant
        .status
        .validate_transition(to)
        .map_err(|source| LedgerError::Transition {
            entity: format!("variant {}", variant.level),
            source,
        })?;
    variant.status = to;
    Ok(())
}

fn set_scene_status(
    level: VariantLevel,
    scene: &mut SceneRecord,
    to: SceneStatus,
) -> Result<(), LedgerError> {
    scene
        .status
        .validate_transition(to)
        .map_err(|source| LedgerError::Transition {
            entity: format!("scene {level}/{}", scene.index),
            source,
        })?;
    scene.status = to;
    Ok(())
}

fn variant_mut(
    snap: &mut SessionSnapshot,
    level: VariantLevel,
) -> Result<&mut VariantRecord, LedgerError> {
    snap.variant_mut(level).ok_or_else(|| LedgerError::Unknown {
        entity: "variant",
        id: level.to_string(),
    })
}

fn unknown_scene(level: VariantLevel, index: SceneIndex) -> LedgerError {
    LedgerError::Unknown {
        entity: "scene",
        id: format!("{level}/{index}"),
    }
}

fn scene_mut(
    snap: &mut SessionSnapshot,
    level: VariantLevel,
    index: SceneIndex,
) -> Result<&mut SceneRecord, LedgerError> {
    variant_mut(snap, level)?
        .scenes
        .iter_mut()
        .find(|s| s.index == index)
        .ok_or_else(|| unknown_scene(level, index))
}

fn refresh_generation_progress(snap: &mut SessionSnapshot) {
    let progress = snap.generation_progress();
    if let Some(stage) = snap.stage_mut(StageName::Generate) {
        if stage.status == StageStatus::InProgress {
            stage.progress = progress;
        }
    }
}

/// Fail every stage and variant that has not reached a terminal state and
/// move open scenes to `scene_status`. Used when the whole session ends
/// early.
fn close_open_work(
    snap: &mut SessionSnapshot,
    scene_status: SceneStatus,
    reason: &str,
    now: Timestamp,
) {
    for stage in snap.stages.iter_mut() {
        if stage.status == StageStatus::InProgress {
            stage.status = StageStatus::Failed;
            stage.completed_at = Some(now);
            stage.error.get_or_insert_with(|| reason.to_string());
        }
    }
    for variant in snap.variants.iter_mut() {
        for scene in variant.scenes.iter_mut() {
            if !scene.status.is_terminal() {
                scene.status = scene_status;
                scene.error.get_or_insert_with(|| reason.to_string());
                scene.last_checked_at = Some(now);
            }
        }
        if !variant.status.is_terminal() {
            variant.status = VariantStatus::Failed;
            variant.error.get_or_insert_with(|| reason.to_string());
            variant.completed_at = Some(now);
        }
    }
}

/// Mirror a ledger event to `tracing` at a level matching its severity.
fn trace_event(event: &PipelineEvent) {
    let variant = event.variant.map(|v| v.as_str()).unwrap_or("-");
    let stage = event.stage.map(|s| s.as_str()).unwrap_or("-");
    match event.severity {
        Severity::Debug => tracing::debug!(
            session_id = %event.session_id,
            cursor = event.cursor,
            event_type = %event.event_type,
            stage,
            variant,
            scene_index = ?event.scene_index,
            "{}", event.message
        ),
        Severity::Info => tracing::info!(
            session_id = %event.session_id,
            cursor = event.cursor,
            event_type = %event.event_type,
            stage,
            variant,
            scene_index = ?event.scene_index,
            "{}", event.message
        ),
        Severity::Warning => tracing::warn!(
            session_id = %event.session_id,
            cursor = event.cursor,
            event_type = %event.event_type,
            stage,
            variant,
            scene_index = ?event.scene_index,
            "{}", event.message
        ),
        Severity::Error => tracing::error!(
            session_id = %event.session_id,
            cursor = event.cursor,
            event_type = %event.event_type,
            stage,
            variant,
            scene_index = ?event.scene_index,
            payload = %event.payload,
            "{}", event.message
        ),
    }
}
