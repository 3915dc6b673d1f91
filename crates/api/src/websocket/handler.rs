//! WebSocket handler for Axum
//!
//! Authenticates the upgrade request, then pumps frames between the socket
//! and the [`RoomSessionManager`](super::manager::RoomSessionManager).

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use parley_shared::Principal;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::extract_credential;
use crate::error::ApiError;
use crate::state::AppState;

use super::events::ServerEvent;
use super::manager::HandshakeHints;

/// Handshake parameters accepted on the upgrade URL
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket.
/// Refuses with 401 before the upgrade when authentication fails.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let credential = extract_credential(params.token.as_deref(), &headers);
    let hints = HandshakeHints {
        user_id: params.user_id,
        role: params.role,
    };

    let principal = match app_state.relay.authenticate(credential.as_deref(), &hints).await {
        Ok(principal) => principal,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket auth failed");
            return Err(e.into());
        }
    };

    tracing::info!(
        user_id = %principal.id,
        role = %principal.role,
        "WebSocket connection upgrade requested"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, principal, app_state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, principal: Principal, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Outbound queue for this socket, drained in order by the writer task
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let relay = app_state.relay.clone();
    let session = relay.open_session(principal, tx).await;
    let session_id = session.session_id;

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => relay.handle_text(&session, &text).await,
            Ok(Message::Close(_)) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Ok(_) => {} // Ping/pong handled by axum, binary ignored
            Err(e) => {
                tracing::debug!(error = ?e, session_id = %session_id, "WebSocket receive error");
                break;
            }
        }
    }

    relay.disconnect(&session).await;
    send_task.abort();
}
