//! WebSocket Connection Handler
//!
//! Accepts realtime clients, handles `join` control messages and forwards
//! queued event frames to the socket.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::messages::{ClientMessage, ServerMessage};
use crate::domain::ConnectionId;
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_message_size = state.settings.websocket.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one connection until the client leaves.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new();
    tracing::debug!(connection_id = %connection_id, "New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.gateway.register(connection_id, tx.clone());

    let ping_every = Duration::from_secs(state.settings.websocket.ping_interval_secs.max(1));

    // Forward queued frames and keep the connection alive.
    let sender_task = tokio::spawn(async move {
        let mut ping = interval(ping_every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(reply) = handle_client_message(&state, connection_id, &text) {
                    if tx.send(reply.to_text()).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.gateway.unregister(connection_id);
    sender_task.abort();
}

/// Apply one control message; returns the reply to send, if any.
fn handle_client_message(
    state: &AppState,
    connection_id: ConnectionId,
    text: &str,
) -> Option<ServerMessage> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => {
            return Some(ServerMessage::Error {
                message: "Invalid message format".into(),
            })
        }
    };

    if message.event != ClientMessage::JOIN {
        tracing::debug!(connection_id = %connection_id, event = %message.event, "Ignoring client event");
        return None;
    }

    match message.join_user_id() {
        Some(user_id) => {
            state.gateway.join(connection_id, user_id);
            Some(ServerMessage::Joined {
                user_id: user_id.to_string(),
            })
        }
        None => Some(ServerMessage::Error {
            message: "userId required".into(),
        }),
    }
}
