//! WebSocket gateway: session lifecycle and inbound client events.
//!
//! One socket per user.  Connecting registers a session handle (replacing
//! any prior one); the socket task then pumps queued server events out and
//! parses `markRead` acknowledgements coming in.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use missive_shared::protocol::ClientEvent;
use missive_shared::types::UserId;

use crate::api::AppState;
use crate::auth::Authenticator;
use crate::error::ServerError;
use crate::presence::SessionHandle;

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Upgrade handler.  Browsers cannot attach headers to WebSocket requests,
/// so the session token arrives as a query parameter.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let user = state
        .auth
        .authenticate(&query.token)
        .ok_or_else(|| ServerError::Unauthorized("invalid session token".to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, user, socket)))
}

async fn handle_socket(state: AppState, user: UserId, socket: WebSocket) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = SessionHandle::new(tx);
    let session_id = handle.id();

    state.presence.register(user, handle).await;
    tracing::info!(user = %user, session = %session_id, "socket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Pump queued server events out to the client, preserving queue order.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        let Ok(frame) = frame else { break };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::MarkRead(ack)) => {
                    if let Err(e) = state.coordinator.mark_read(user, ack.message_id).await {
                        tracing::debug!(user = %user, error = %e, "markRead rejected");
                    }
                }
                Err(e) => {
                    tracing::debug!(user = %user, error = %e, "unparseable client event");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();

    // Only evict our own registration; a newer connection may already have
    // replaced it.
    if state.presence.lookup(user).await.map(|h| h.id()) == Some(session_id) {
        state.presence.unregister(user).await;
    }
    tracing::info!(user = %user, session = %session_id, "socket disconnected");
}
