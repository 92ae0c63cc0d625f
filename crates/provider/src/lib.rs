//! Clients for the remote services the pipeline depends on.
//!
//! - [`video_api`]: [`HttpVideoProvider`](video_api::HttpVideoProvider), a
//!   [`GenerationProvider`](adclone_core::provider::GenerationProvider) for a
//!   `/videos` style generation API.
//! - [`collaborator_api`]: [`HttpCollaborators`](collaborator_api::HttpCollaborators),
//!   JSON-over-HTTP implementations of the analysis, prompt, assembly and
//!   evaluation seams.
//! - [`mock`]: scripted in-memory doubles for tests and local runs.

pub mod collaborator_api;
pub mod mock;
pub mod video_api;
