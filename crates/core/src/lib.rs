//! Domain building blocks for the ad-clone pipeline.
//!
//! This crate has no internal dependencies. The ledger, the provider
//! clients, the pipeline and the transport adapter all share its vocabulary:
//!
//! - [`types`]: identifier and timestamp aliases.
//! - [`status`]: session / stage / variant / scene lifecycles and their
//!   transition tables.
//! - [`stage`]: the fixed stage sequence and its failure policy.
//! - [`variant`]: the fixed set of variant levels.
//! - [`backoff`]: exponential retry policy shared by provider calls.
//! - [`env`]: environment-variable parsing for configuration.
//! - [`event_kinds`]: event type names, severities and the error taxonomy.
//! - [`collaborators`]: traits for the external analysis / prompt /
//!   assembly / evaluation services.
//! - [`provider`]: the remote generation provider seam.

pub mod backoff;
pub mod collaborators;
pub mod env;
pub mod error;
pub mod event_kinds;
pub mod provider;
pub mod stage;
pub mod status;
pub mod types;
pub mod variant;
