use adclone_core::error::CoreError;
use adclone_core::event_kinds::ErrorKind;
use adclone_core::stage::StageName;
use adclone_core::types::SessionId;
use adclone_events::LedgerError;

/// Why a session ended without completing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A fatal stage failed; no later stage ran.
    #[error("Stage {stage} failed: {message}")]
    FatalStage { stage: StageName, message: String },

    #[error("Session cancelled")]
    Cancelled,

    #[error("Session deadline exceeded")]
    SessionDeadline,

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl PipelineError {
    /// Error kind recorded in the terminal `session_failed` event.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::SessionDeadline => ErrorKind::JobTimeoutError,
            Self::FatalStage { .. }
            | Self::SessionNotFound(_)
            | Self::Core(_)
            | Self::Ledger(_) => ErrorKind::FatalStageError,
        }
    }
}
