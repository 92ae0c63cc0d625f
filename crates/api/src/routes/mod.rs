pub mod health;
pub mod sessions;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /sessions                      list, start
/// /sessions/{id}                 snapshot
/// /sessions/{id}/events          events after a cursor
/// /sessions/{id}/cancel          cancel (POST)
/// /sessions/{id}/ws              WebSocket event stream
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/sessions", sessions::router())
}
