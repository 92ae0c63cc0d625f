//! Durable snapshot stores.
//!
//! A store keeps exactly one record per session and replaces it wholesale
//! on every save. [`FileSnapshotStore`] writes to a temporary file in the
//! target directory and renames it over the previous snapshot, so a crash
//! leaves either the old or the new record on disk.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use adclone_core::types::SessionId;
use async_trait::async_trait;

use crate::error::LedgerError;
use crate::snapshot::SessionRecord;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Atomically replace the record for `record.snapshot.id`.
    async fn save(&self, record: &SessionRecord) -> Result<(), LedgerError>;

    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, LedgerError>;

    /// Every persisted record. Unreadable entries are skipped with a warning.
    async fn load_all(&self) -> Result<Vec<SessionRecord>, LedgerError>;
}

// ---------------------------------------------------------------------------
// FileSnapshotStore
// ---------------------------------------------------------------------------

/// One `<session_id>.json` file per session under a state directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create the store, creating `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| LedgerError::Io(e.error))?;
    Ok(())
}

fn read_record(path: &Path) -> Result<Option<SessionRecord>, LedgerError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn join_error(e: tokio::task::JoinError) -> LedgerError {
    LedgerError::Io(std::io::Error::other(e))
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let dir = self.dir.clone();
        let target = self.path_for(record.snapshot.id);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(join_error)?
    }

    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, LedgerError> {
        let path = self.path_for(id);
        tokio::task::spawn_blocking(move || read_record(&path))
            .await
            .map_err(join_error)?
    }

    async fn load_all(&self) -> Result<Vec<SessionRecord>, LedgerError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match read_record(&path) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot");
                    }
                }
            }
            Ok(records)
        })
        .await
        .map_err(join_error)?
    }
}

// ---------------------------------------------------------------------------
// MemorySnapshotStore
// ---------------------------------------------------------------------------

/// Keeps serialized records in memory. Used by tests and by servers
/// running without a state directory.
#[derive(Default)]
pub struct MemorySnapshotStore {
    records: Mutex<HashMap<SessionId, Vec<u8>>>,
    saves: Mutex<u64>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> u64 {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec(record)?;
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.snapshot.id, bytes);
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, LedgerError> {
        let bytes = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned();
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<SessionRecord>, LedgerError> {
        let all: Vec<Vec<u8>> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(LedgerError::from))
            .collect()
    }
}
