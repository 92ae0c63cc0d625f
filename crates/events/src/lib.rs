//! Progress ledger and event bus for pipeline sessions.
//!
//! - [`bus`]: the [`PipelineEvent`](bus::PipelineEvent) envelope and the
//!   broadcast [`EventBus`](bus::EventBus).
//! - [`snapshot`]: the hierarchical session / stage / variant / scene
//!   projection and the persisted [`SessionRecord`](snapshot::SessionRecord).
//! - [`ledger`]: [`ProgressLedger`](ledger::ProgressLedger), the single
//!   writer for one session's snapshot and event log.
//! - [`persistence`]: snapshot stores (atomic files, in-memory).

pub mod bus;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod snapshot;

pub use bus::{EventBus, PipelineEvent};
pub use error::LedgerError;
pub use ledger::ProgressLedger;
pub use persistence::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use snapshot::{SceneRecord, SessionRecord, SessionSnapshot, StageRecord, VariantRecord};
