//! Session-wide stop signal.
//!
//! Cancellation and the session deadline both stop a session through the
//! same [`StopSignal`]; the first reason recorded wins.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    DeadlineExceeded,
}

impl StopReason {
    pub fn as_error(&self) -> PipelineError {
        match self {
            Self::Cancelled => PipelineError::Cancelled,
            Self::DeadlineExceeded => PipelineError::SessionDeadline,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the session. Returns `false` if it was already stopped.
    pub fn stop(&self, reason: StopReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the session is stopped.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }

    /// `Err` with the stop reason if the session has been stopped.
    pub fn check(&self) -> Result<(), PipelineError> {
        match self.reason() {
            Some(reason) => Err(reason.as_error()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn first_reason_wins() {
        let stop = StopSignal::new();
        assert!(stop.check().is_ok());
        assert!(stop.stop(StopReason::DeadlineExceeded));
        assert!(!stop.stop(StopReason::Cancelled));
        assert_eq!(stop.reason(), Some(StopReason::DeadlineExceeded));
        assert_matches!(stop.check(), Err(PipelineError::SessionDeadline));
    }

    #[tokio::test]
    async fn clones_share_the_signal() {
        let stop = StopSignal::new();
        let other = stop.clone();
        stop.stop(StopReason::Cancelled);
        other.stopped().await;
        assert!(other.is_stopped());
    }
}
