use adclone_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A status change the lifecycle tables do not allow.
    #[error("Invalid transition for {entity}: {source}")]
    Transition {
        entity: String,
        #[source]
        source: CoreError,
    },

    #[error("Unknown {entity}: {id}")]
    Unknown { entity: &'static str, id: String },

    /// A mutation that would break a hierarchy rule, e.g. assembling a
    /// variant whose scenes are not all completed.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
