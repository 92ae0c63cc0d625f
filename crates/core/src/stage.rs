//! The fixed stage sequence of a session.
//!
//! Stages run strictly in [`StageName::ALL`] order. Each stage carries a
//! [`FailurePolicy`]: a fatal stage aborts the session, a soft stage
//! substitutes a fallback value and lets the session continue.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a stage failure means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the session; no later stage runs.
    Fatal,
    /// Record a degraded-path event, use a fallback, continue.
    Soft,
}

/// Name of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    Analyze,
    Transform,
    PlanVariants,
    BuildPrompts,
    Generate,
    Assemble,
    Evaluate,
}

impl StageName {
    /// Every stage, in execution order.
    pub const ALL: [StageName; 7] = [
        StageName::Analyze,
        StageName::Transform,
        StageName::PlanVariants,
        StageName::BuildPrompts,
        StageName::Generate,
        StageName::Assemble,
        StageName::Evaluate,
    ];

    /// Return the wire-format string for this stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Transform => "transform",
            Self::PlanVariants => "plan-variants",
            Self::BuildPrompts => "build-prompts",
            Self::Generate => "generate",
            Self::Assemble => "assemble",
            Self::Evaluate => "evaluate",
        }
    }

    /// Failure policy for this stage.
    ///
    /// `assemble` only collects artifacts already produced by the per-variant
    /// assembly gates, so it is soft.
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Self::Analyze | Self::PlanVariants | Self::BuildPrompts | Self::Generate => {
                FailurePolicy::Fatal
            }
            Self::Transform | Self::Assemble | Self::Evaluate => FailurePolicy::Soft,
        }
    }

    /// Shorthand for `failure_policy() == Fatal`.
    pub fn is_fatal(&self) -> bool {
        self.failure_policy() == FailurePolicy::Fatal
    }

    /// Zero-based position in the sequence.
    pub fn position(&self) -> usize {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::ALL.len())
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
