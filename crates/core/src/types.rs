/// Sessions are keyed by UUID v7 so identifiers sort by creation time.
pub type SessionId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Zero-based position of a scene inside its variant. Defines assembly order.
pub type SceneIndex = usize;

/// Reference to a fetched scene output (path or URL).
pub type OutputRef = String;

/// Reference to an assembled variant artifact (path or URL).
pub type ArtifactRef = String;

/// Mint a fresh, time-ordered session id.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::now_v7()
}
