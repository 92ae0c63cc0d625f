//! Lifecycle enums and their state machines.
//!
//! Every status enum exposes its reachable targets through [`Lifecycle`].
//! Terminal states have no outgoing transitions, which is what makes the
//! ledger's "never regress" guarantee enforceable in one place.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Shared state-machine behaviour for the status enums.
pub trait Lifecycle: Copy + PartialEq + std::fmt::Debug + 'static {
    /// Wire-format name of the status.
    fn as_str(&self) -> &'static str;

    /// Statuses reachable from `self` in one step.
    fn valid_transitions(&self) -> &'static [Self];

    /// Terminal statuses accept no further transitions.
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Check whether moving from `self` to `to` is allowed.
    fn can_transition(&self, to: Self) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a transition, returning a [`CoreError::Conflict`] naming
    /// both ends for invalid ones.
    fn validate_transition(&self, to: Self) -> Result<(), CoreError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid transition: {} -> {}",
                self.as_str(),
                to.as_str()
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Overall status of one end-to-end run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Lifecycle for SessionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            // Pending -> Failed covers cancellation before the first stage.
            Self::Pending => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Status of one stage record. Monotonic: never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Lifecycle for StageStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::InProgress],
            Self::InProgress => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

/// Status of one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    Pending,
    Generating,
    Assembling,
    Completed,
    Failed,
}

impl Lifecycle for VariantStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Generating, Self::Failed],
            Self::Generating => &[Self::Assembling, Self::Failed],
            // Completed is only reachable through Assembling.
            Self::Assembling => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// Status of one scene (one remote job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Queued,
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl SceneStatus {
    /// Failed or timed out; either one fails the owning variant.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl Lifecycle for SceneStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Queued => &[Self::Submitted, Self::Failed, Self::TimedOut],
            Self::Submitted => &[Self::Polling, Self::Completed, Self::Failed, Self::TimedOut],
            Self::Polling => &[Self::Completed, Self::Failed, Self::TimedOut],
            Self::Completed | Self::Failed | Self::TimedOut => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_transitions() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(VariantStatus::Completed.is_terminal());
        assert!(VariantStatus::Failed.is_terminal());
        assert!(SceneStatus::Completed.is_terminal());
        assert!(SceneStatus::Failed.is_terminal());
        assert!(SceneStatus::TimedOut.is_terminal());
    }

    #[test]
    fn stage_cannot_regress() {
        assert!(!StageStatus::Completed.can_transition(StageStatus::InProgress));
        assert!(!StageStatus::InProgress.can_transition(StageStatus::Pending));
        assert!(!StageStatus::Failed.can_transition(StageStatus::Completed));
    }

    #[test]
    fn stage_cannot_skip_in_progress() {
        assert!(!StageStatus::Pending.can_transition(StageStatus::Completed));
    }

    #[test]
    fn variant_reaches_completed_only_through_assembling() {
        assert!(!VariantStatus::Generating.can_transition(VariantStatus::Completed));
        assert!(VariantStatus::Generating.can_transition(VariantStatus::Assembling));
        assert!(VariantStatus::Assembling.can_transition(VariantStatus::Completed));
    }

    #[test]
    fn assembling_variant_can_still_fail() {
        assert!(VariantStatus::Assembling.can_transition(VariantStatus::Failed));
    }

    #[test]
    fn queued_scene_can_time_out_or_fail_before_submission() {
        assert!(SceneStatus::Queued.can_transition(SceneStatus::TimedOut));
        assert!(SceneStatus::Queued.can_transition(SceneStatus::Failed));
        assert!(!SceneStatus::Queued.can_transition(SceneStatus::Completed));
    }

    #[test]
    fn validate_transition_names_both_ends() {
        let err = SceneStatus::Completed
            .validate_transition(SceneStatus::Polling)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Conflict: Invalid transition: completed -> polling"
        );
    }

    #[test]
    fn scene_failure_helper_covers_timeout() {
        assert!(SceneStatus::TimedOut.is_failure());
        assert!(SceneStatus::Failed.is_failure());
        assert!(!SceneStatus::Completed.is_failure());
    }

    #[test]
    fn stage_status_serializes_snake_case() {
        let json = serde_json::to_string(&StageStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
