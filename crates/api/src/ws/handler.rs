use std::sync::Arc;

use adclone_core::event_kinds::{
    EVENT_SESSION_COMPLETED, EVENT_SESSION_FAILED, EVENT_SESSION_INTERRUPTED,
};
use adclone_core::types::SessionId;
use adclone_events::PipelineEvent;
use adclone_pipeline::SessionManager;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::error::AppResult;
use crate::handlers::sessions::EventsQuery;
use crate::state::AppState;

type Sink = SplitSink<WebSocket, Message>;

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The client first receives every recorded event after `?after=<cursor>`,
/// then live events until the session ends or the client disconnects.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Query(query): Query<EventsQuery>,
) -> AppResult<impl IntoResponse> {
    // Resolve the session before upgrading so an unknown id is a plain 404.
    let (backlog, live) = state.sessions.subscribe_from(id, query.after).await?;
    let sessions = state.sessions.clone();
    let after = query.after;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, sessions, id, after, backlog, live)))
}

async fn handle_socket(
    socket: WebSocket,
    sessions: Arc<SessionManager>,
    id: SessionId,
    after: u64,
    backlog: Vec<PipelineEvent>,
    mut live: broadcast::Receiver<PipelineEvent>,
) {
    tracing::info!(session_id = %id, backlog = backlog.len(), "WebSocket connected");
    let (mut sink, mut stream) = socket.split();
    let mut cursor = after;

    match forward(&mut sink, backlog, &mut cursor).await {
        Ok(true) | Err(()) => return close(sink, id).await,
        Ok(false) => {}
    }

    // Already finished before the final event reached the backlog window.
    let terminal = sessions
        .get_status(id)
        .await
        .map(|s| s.is_terminal())
        .unwrap_or(true);
    if terminal {
        let mut rest = Vec::new();
        loop {
            match live.try_recv() {
                Ok(event) => rest.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        let _ = forward(&mut sink, rest, &mut cursor).await;
        return close(sink, id).await;
    }

    loop {
        tokio::select! {
            received = live.recv() => {
                let batch = match received {
                    Ok(event) => vec![event],
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(session_id = %id, skipped, "WebSocket lagged, replaying from ledger");
                        match sessions.events_after(id, cursor).await {
                            Ok(events) => events,
                            Err(_) => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                match forward(&mut sink, batch, &mut cursor).await {
                    Ok(false) => {}
                    Ok(true) | Err(()) => break,
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session_id = %id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    close(sink, id).await;
}

/// Send events newer than `cursor`. Returns `Ok(true)` after the session's
/// final event.
async fn forward(
    sink: &mut Sink,
    events: Vec<PipelineEvent>,
    cursor: &mut u64,
) -> Result<bool, ()> {
    for event in events {
        if event.cursor <= *cursor {
            continue;
        }
        let text = serde_json::to_string(&event).map_err(|_| ())?;
        sink.send(Message::Text(text.into())).await.map_err(|_| ())?;
        *cursor = event.cursor;
        if is_final(&event) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_final(event: &PipelineEvent) -> bool {
    matches!(
        event.event_type.as_str(),
        EVENT_SESSION_COMPLETED | EVENT_SESSION_FAILED | EVENT_SESSION_INTERRUPTED
    )
}

async fn close(mut sink: Sink, id: SessionId) {
    let _ = sink.send(Message::Close(None)).await;
    tracing::info!(session_id = %id, "WebSocket disconnected");
}
