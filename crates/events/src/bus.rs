//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! Each [`ProgressLedger`](crate::ledger::ProgressLedger) owns one
//! [`EventBus`]; transport adapters subscribe to it and forward events to
//! whatever channel they serve. The core never talks to a transport.

use adclone_core::event_kinds::{ErrorKind, Severity};
use adclone_core::stage::StageName;
use adclone_core::types::{SceneIndex, SessionId, Timestamp};
use adclone_core::variant::VariantLevel;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// One entry of a session's append-only event log.
///
/// Built with [`PipelineEvent::new`] and the `with_*` methods; the ledger
/// stamps [`cursor`](Self::cursor) and [`session_id`](Self::session_id)
/// when the event is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// 1-based position in the session log. Late subscribers resume from
    /// the last cursor they saw.
    pub cursor: u64,

    pub session_id: SessionId,

    /// Snake-case event name, e.g. `"scene_completed"`.
    pub event_type: String,

    pub severity: Severity,

    /// Human readable summary.
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<VariantLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_index: Option<SceneIndex>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: Timestamp,
}

impl PipelineEvent {
    /// Create an `info` event with an empty payload.
    pub fn new(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cursor: 0,
            session_id: SessionId::nil(),
            event_type: event_type.into(),
            severity: Severity::Info,
            message: message.into(),
            stage: None,
            variant: None,
            scene_index: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_stage(mut self, stage: StageName) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_variant(mut self, level: VariantLevel) -> Self {
        self.variant = Some(level);
        self
    }

    /// Attach a scene; also sets the owning variant.
    pub fn with_scene(mut self, level: VariantLevel, index: SceneIndex) -> Self {
        self.variant = Some(level);
        self.scene_index = Some(index);
        self
    }

    /// Set the JSON payload. Non-object values are wrapped as `{"value": ..}`
    /// so that [`with_field`](Self::with_field) always has an object to
    /// extend.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = match payload {
            serde_json::Value::Object(_) => payload,
            other => serde_json::json!({ "value": other }),
        };
        self
    }

    /// Insert a single payload key.
    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.payload {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Tag the event with an error kind and detail.
    pub fn with_error(self, kind: ErrorKind, detail: impl Into<String>) -> Self {
        self.with_field("error_kind", kind.as_str())
            .with_field("error", detail.into())
    }

    /// The error kind recorded by [`with_error`](Self::with_error), if any.
    pub fn error_kind(&self) -> Option<&str> {
        self.payload.get("error_kind").and_then(|v| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`PipelineEvent`].
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`. They can
    /// recover from the ledger with
    /// [`events_after`](crate::ledger::ProgressLedger::events_after).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is dropped; the ledger
    /// has already recorded it.
    pub fn publish(&self, event: PipelineEvent) {
        // Ignore the SendError, it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
