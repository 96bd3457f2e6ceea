//! WebSocket handler for live notifications

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use super::AppState;
use crate::Result;
use crate::models::{Notification, User};
use crate::notify::{Channel, Transport};

/// A serialized notification addressed to one user.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    pub user_id: i64,
    pub payload: String,
}

/// Socket transport: publishes every notification on a broadcast channel.
pub struct BroadcastTransport {
    tx: broadcast::Sender<SocketEvent>,
}

impl BroadcastTransport {
    pub fn new(tx: broadcast::Sender<SocketEvent>) -> Self {
        Self { tx }
    }
}

impl Transport for BroadcastTransport {
    fn channel(&self) -> Channel {
        Channel::Socket
    }

    fn send(&self, notification: &Notification, recipient: &User) -> Result<()> {
        let payload = serde_json::to_string(&json!({
            "type": "notification",
            "notification": notification,
        }))?;
        // No subscribers is not a failure
        if self
            .tx
            .send(SocketEvent {
                user_id: recipient.id,
                payload,
            })
            .is_err()
        {
            debug!(user_id = recipient.id, "no socket listeners");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    pub user_id: i64,
}

/// WebSocket upgrade handler. `?user_id=` selects whose notifications to stream.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SocketParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.user_id))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, user_id: i64) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.user_id == user_id => {
                    if sender.send(Message::Text(event.payload)).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(user_id, skipped, "socket client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
    debug!(user_id, "socket closed");
}
