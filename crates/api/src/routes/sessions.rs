//! Route definitions for the `/sessions` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::sessions;
use crate::state::AppState;
use crate::ws;

/// Routes mounted at `/sessions`.
///
/// ```text
/// GET    /                -> list_sessions
/// POST   /                -> start_session
/// GET    /{id}            -> get_session
/// GET    /{id}/events     -> list_events
/// POST   /{id}/cancel     -> cancel_session
/// GET    /{id}/ws         -> ws_handler
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(sessions::list_sessions).post(sessions::start_session))
        .route("/{id}", get(sessions::get_session))
        .route("/{id}/events", get(sessions::list_events))
        .route("/{id}/cancel", post(sessions::cancel_session))
        .route("/{id}/ws", get(ws::ws_handler))
}
