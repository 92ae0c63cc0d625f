//! Handlers for the `/sessions` resource.

use adclone_core::types::SessionId;
use adclone_core::variant::VariantLevel;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /sessions`.
#[derive(Debug, Deserialize)]
pub struct StartSession {
    pub input_reference: String,
    /// Level names; empty or absent requests every level.
    #[serde(default)]
    pub variant_levels: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub id: SessionId,
}

/// Query of `GET /sessions/{id}/events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Return events with a cursor strictly greater than this.
    #[serde(default)]
    pub after: u64,
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/sessions
///
/// Start a session in the background. Returns 202 with its id.
pub async fn start_session(
    State(state): State<AppState>,
    Json(input): Json<StartSession>,
) -> AppResult<impl IntoResponse> {
    let levels = input
        .variant_levels
        .iter()
        .map(|l| VariantLevel::parse(l))
        .collect::<Result<Vec<_>, _>>()?;

    let id = state.sessions.start(&input.input_reference, &levels).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SessionCreated { id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.sessions.list().await,
    }))
}

/// GET /api/v1/sessions/{id}
///
/// Full stage / variant / scene snapshot.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.sessions.get_status(id).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

/// GET /api/v1/sessions/{id}/events?after=<cursor>
pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Query(query): Query<EventsQuery>,
) -> AppResult<impl IntoResponse> {
    let events = state.sessions.events_after(id, query.after).await?;
    Ok(Json(DataResponse { data: events }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/sessions/{id}/cancel
///
/// Returns 204, or 409 if the session already finished.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> AppResult<impl IntoResponse> {
    state.sessions.cancel(id).await?;
    tracing::info!(session_id = %id, "Session cancelled via API");
    Ok(StatusCode::NO_CONTENT)
}
