//! Session orchestration and the parallel job scheduler.
//!
//! A [`SessionManager`](session::SessionManager) spawns one
//! [`StageSequencer`](sequencer::StageSequencer) per session. During the
//! `generate` stage the sequencer runs one
//! [`VariantCoordinator`](coordinator::VariantCoordinator) per variant; each
//! coordinator drives its scenes through a
//! [`JobScheduler`](scheduler::JobScheduler) and hands completed outputs to
//! its [`AssemblyGate`](gate::AssemblyGate). All state changes go through
//! the session's [`ProgressLedger`](adclone_events::ProgressLedger).

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod scheduler;
pub mod sequencer;
pub mod session;
pub mod stop;

pub use collaborators::{Collaborators, LevelPlanner};
pub use config::{EvaluationFallback, PipelineConfig, TransformFallback};
pub use error::PipelineError;
pub use session::{SessionManager, SessionRegistry, SessionSummary};
pub use stop::{StopReason, StopSignal};
