//! Per-socket connection handler.
//!
//! Each admitted websocket gets a reader loop (this task) and a spawned
//! writer task fed by a bounded channel, so a slow peer can never stall the
//! shared runtime. The session lives exactly as long as the socket: it is
//! recorded after the gate admits and removed on teardown, and only the
//! last session of a user produces an offline broadcast.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use reel_sdk::event::{ClientEvent, ServerEvent};

use crate::auth::Identity;
use crate::dispatch;
use crate::fanout;
use crate::server::SharedState;

/// One live connection for one authenticated user.
#[derive(Debug, Clone)]
pub struct SocketSession {
    pub user_id: String,
    pub username: String,
    pub connection_id: String,
    pub established_at: DateTime<Utc>,
}

/// Drive an admitted socket until it closes.
pub async fn handle_socket(socket: WebSocket, state: Arc<SharedState>, identity: Identity) {
    let connection_id = Uuid::new_v4().to_string();
    if !state.dispatcher.bind(&connection_id) {
        tracing::warn!(%connection_id, "connection already has bound handlers, refusing");
        return;
    }

    let session = SocketSession {
        user_id: identity.user_id,
        username: identity.username,
        connection_id: connection_id.clone(),
        established_at: Utc::now(),
    };
    tracing::info!(
        %connection_id,
        user_id = %session.user_id,
        "socket connected"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: everything pushed at this connection goes through the
    // bounded channel so fan-out never awaits a remote peer.
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(256);
    state
        .connections
        .lock()
        .insert(connection_id.clone(), tx);

    let writer_connection_id = connection_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("event serialization failed: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(connection_id = %writer_connection_id, "write failed, peer gone");
                break;
            }
        }
    });

    let came_online = state
        .registry
        .add_session(&session.user_id, &connection_id)
        .await;

    fanout::send_to_connection(
        &state,
        &connection_id,
        ServerEvent::Connected {
            user_id: session.user_id.clone(),
            status: "online".to_string(),
        },
    );
    if came_online {
        fanout::broadcast_status(&state, &session.user_id, true).await;
    }

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => dispatch::dispatch(&state, &session, event).await,
                Err(e) => {
                    tracing::debug!(%connection_id, "ignoring undecodable event: {e}");
                }
            },
            Ok(Message::Close(_)) => break,
            // Ping/pong is answered by the transport layer.
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%connection_id, "socket error: {e}");
                break;
            }
        }
    }

    // Teardown. Remove the sender first so a racing fan-out lands on a dead
    // channel instead of a torn-down socket; it gets dropped either way.
    state.connections.lock().remove(&connection_id);
    let went_offline = state
        .registry
        .remove_session(&session.user_id, &connection_id)
        .await;
    state.dispatcher.release(&connection_id);
    if went_offline {
        fanout::broadcast_status(&state, &session.user_id, false).await;
    }
    write_handle.abort();

    tracing::info!(
        %connection_id,
        user_id = %session.user_id,
        fully_offline = went_offline,
        "socket closed"
    );
}
