//! Event type names, severities and the error taxonomy.
//!
//! Event types are plain strings on the wire so that transport adapters can
//! forward them without knowing the Rust types behind them.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub const EVENT_SESSION_STARTED: &str = "session_started";
pub const EVENT_SESSION_COMPLETED: &str = "session_completed";
pub const EVENT_SESSION_FAILED: &str = "session_failed";
/// Cancellation requested by a caller.
pub const EVENT_SESSION_CANCELLED: &str = "session_cancelled";
/// A persisted session was found non-terminal after a restart.
pub const EVENT_SESSION_INTERRUPTED: &str = "session_interrupted";

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

pub const EVENT_STAGE_STARTED: &str = "stage_started";
pub const EVENT_STAGE_COMPLETED: &str = "stage_completed";
pub const EVENT_STAGE_FAILED: &str = "stage_failed";
/// A soft stage failed and its fallback value was used.
pub const EVENT_STAGE_DEGRADED: &str = "stage_degraded";
/// A fatal stage's collaborator call failed and is being retried.
pub const EVENT_STAGE_RETRYING: &str = "stage_retrying";

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

pub const EVENT_VARIANT_STARTED: &str = "variant_started";
pub const EVENT_VARIANT_ASSEMBLING: &str = "variant_assembling";
pub const EVENT_VARIANT_COMPLETED: &str = "variant_completed";
pub const EVENT_VARIANT_FAILED: &str = "variant_failed";

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

pub const EVENT_SCENE_SUBMITTED: &str = "scene_submitted";
pub const EVENT_SCENE_PROGRESS: &str = "scene_progress";
/// A transient provider error is being retried.
pub const EVENT_SCENE_RETRYING: &str = "scene_retrying";
pub const EVENT_SCENE_COMPLETED: &str = "scene_completed";
pub const EVENT_SCENE_FAILED: &str = "scene_failed";
pub const EVENT_SCENE_TIMED_OUT: &str = "scene_timed_out";

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub const EVENT_EVALUATION_COMPLETED: &str = "evaluation_completed";
pub const EVENT_EVALUATION_FAILED: &str = "evaluation_failed";

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity attached to every ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Classification carried in the payload of every error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A fatal stage's collaborator failed after its retry budget.
    FatalStageError,
    /// A soft stage's collaborator failed; a fallback was used.
    SoftStageError,
    /// Retryable submit / status / fetch failure.
    TransientProviderError,
    /// Provider reported failure, or fetch failed after completion.
    JobFailedError,
    /// Job passed its wall-clock deadline.
    JobTimeoutError,
    /// All scenes succeeded but combining their outputs failed.
    AssemblyError,
    /// Evaluating an artifact failed; never affects terminal status.
    EvaluationError,
    /// The session was cancelled.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FatalStageError => "FatalStageError",
            Self::SoftStageError => "SoftStageError",
            Self::TransientProviderError => "TransientProviderError",
            Self::JobFailedError => "JobFailedError",
            Self::JobTimeoutError => "JobTimeoutError",
            Self::AssemblyError => "AssemblyError",
            Self::EvaluationError => "EvaluationError",
            Self::Cancelled => "Cancelled",
        }
    }
}
