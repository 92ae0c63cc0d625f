use std::sync::Arc;

use adclone_pipeline::SessionManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Starts, observes and cancels pipeline sessions.
    pub sessions: Arc<SessionManager>,
}
