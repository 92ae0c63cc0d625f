//! Hierarchical projection of one session.
//!
//! [`SessionSnapshot`] is what `get_status` returns. [`SessionRecord`] is
//! the snapshot plus the append-only event log; it is the unit the
//! [`SnapshotStore`](crate::persistence::SnapshotStore) persists.

use adclone_core::provider::JobHandle;
use adclone_core::stage::StageName;
use adclone_core::status::{Lifecycle, SceneStatus, SessionStatus, StageStatus, VariantStatus};
use adclone_core::types::{ArtifactRef, OutputRef, SceneIndex, SessionId, Timestamp};
use adclone_core::variant::VariantLevel;
use serde::{Deserialize, Serialize};

use crate::bus::PipelineEvent;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: StageName,
    pub status: StageStatus,
    /// 0-100.
    pub progress: u8,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Stage output, consumed by the next stage.
    #[serde(default)]
    pub result: serde_json::Value,
    /// Set when the stage failed, or degraded to its fallback.
    #[serde(default)]
    pub error: Option<String>,
    /// `true` when a soft stage completed with its fallback value.
    #[serde(default)]
    pub degraded: bool,
}

impl StageRecord {
    fn pending(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            progress: 0,
            started_at: None,
            completed_at: None,
            result: serde_json::Value::Null,
            error: None,
            degraded: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    /// Position inside the variant; defines assembly order.
    pub index: SceneIndex,
    pub status: SceneStatus,
    pub job: Option<JobHandle>,
    pub output: Option<OutputRef>,
    pub error: Option<String>,
    /// Last provider-reported percentage.
    pub progress: Option<u8>,
    pub poll_attempts: u32,
    pub last_checked_at: Option<Timestamp>,
    /// Transient failures seen while submitting.
    #[serde(default)]
    pub submit_attempts: u32,
}

impl SceneRecord {
    pub fn queued(index: SceneIndex) -> Self {
        Self {
            index,
            status: SceneStatus::Queued,
            job: None,
            output: None,
            error: None,
            progress: None,
            poll_attempts: 0,
            last_checked_at: None,
            submit_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    /// The variant id.
    pub level: VariantLevel,
    pub status: VariantStatus,
    /// Ordered by scene index.
    pub scenes: Vec<SceneRecord>,
    /// Set only once the variant completed.
    pub artifact: Option<ArtifactRef>,
    pub error: Option<String>,
    /// Score from the evaluate stage, or its fallback.
    #[serde(default)]
    pub score: Option<f64>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl VariantRecord {
    pub fn pending(level: VariantLevel) -> Self {
        Self {
            level,
            status: VariantStatus::Pending,
            scenes: Vec::new(),
            artifact: None,
            error: None,
            score: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Scene ids in assembly order, formatted `<level>/<index>`.
    pub fn scene_ids(&self) -> Vec<String> {
        self.scenes
            .iter()
            .map(|s| format!("{}/{}", self.level, s.index))
            .collect()
    }

    pub fn scene(&self, index: SceneIndex) -> Option<&SceneRecord> {
        self.scenes.iter().find(|s| s.index == index)
    }

    pub fn all_scenes_terminal(&self) -> bool {
        self.scenes.iter().all(|s| s.status.is_terminal())
    }

    pub fn all_scenes_completed(&self) -> bool {
        !self.scenes.is_empty() && self.scenes.iter().all(|s| s.status == SceneStatus::Completed)
    }
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// Current hierarchical status of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub input_reference: String,
    pub levels: Vec<VariantLevel>,
    pub status: SessionStatus,
    pub current_stage: Option<StageName>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    /// First fatal error, once the session failed.
    pub error: Option<String>,
    pub stages: Vec<StageRecord>,
    pub variants: Vec<VariantRecord>,
}

impl SessionSnapshot {
    /// A pending session with every stage pending and no variants yet.
    pub fn new(
        id: SessionId,
        input_reference: impl Into<String>,
        levels: Vec<VariantLevel>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            input_reference: input_reference.into(),
            levels,
            status: SessionStatus::Pending,
            current_stage: None,
            created_at,
            completed_at: None,
            error: None,
            stages: StageName::ALL.iter().map(|s| StageRecord::pending(*s)).collect(),
            variants: Vec::new(),
        }
    }

    pub fn stage(&self, name: StageName) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub(crate) fn stage_mut(&mut self, name: StageName) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    pub fn variant(&self, level: VariantLevel) -> Option<&VariantRecord> {
        self.variants.iter().find(|v| v.level == level)
    }

    pub(crate) fn variant_mut(&mut self, level: VariantLevel) -> Option<&mut VariantRecord> {
        self.variants.iter_mut().find(|v| v.level == level)
    }

    /// Share of terminal scenes across all variants, 0-100.
    pub fn generation_progress(&self) -> u8 {
        let (done, total) = self
            .variants
            .iter()
            .flat_map(|v| v.scenes.iter())
            .fold((0usize, 0usize), |(done, total), s| {
                (done + usize::from(s.status.is_terminal()), total + 1)
            });
        if total == 0 {
            return 0;
        }
        ((done * 100) / total) as u8
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Artifacts of completed variants, in requested-level order.
    pub fn artifacts(&self) -> Vec<(VariantLevel, ArtifactRef)> {
        self.variants
            .iter()
            .filter_map(|v| v.artifact.clone().map(|a| (v.level, a)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SessionRecord
// ---------------------------------------------------------------------------

/// The durable record of one session: snapshot plus event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    pub events: Vec<PipelineEvent>,
}

impl SessionRecord {
    pub fn new(snapshot: SessionSnapshot) -> Self {
        Self {
            snapshot,
            events: Vec::new(),
        }
    }

    /// Cursor of the most recent event, 0 when the log is empty.
    pub fn last_cursor(&self) -> u64 {
        self.events.last().map(|e| e.cursor).unwrap_or(0)
    }
}
