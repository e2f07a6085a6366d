//! WebSocket endpoint for the local PC agent.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use toolbridge_core::{InboundOutcome, LinkHandle};
use toolbridge_session::SessionRegistry;

use crate::{
    http::{AppState, secret_matches},
    protocol::JsonRpcRequest,
};

/// Header carrying the agent's pre-shared key.
pub const BRIDGE_KEY_HEADER: &str = "x-bridge-key";

/// Close code sent to agents presenting a wrong or missing key.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// `notifications/message` sent to every session on bridge state changes.
#[must_use]
pub fn bridge_event(event: &str, mut data: Value) -> Value {
    if let Value::Object(map) = &mut data {
        map.insert("event".to_string(), json!(event));
    }
    let level = if event == "disconnected" { "warning" } else { "info" };
    let notification = JsonRpcRequest::notification(
        "notifications/message",
        json!({"level": level, "logger": "bridge", "data": data}),
    );
    serde_json::to_value(notification).unwrap_or(Value::Null)
}

fn announce(sessions: &SessionRegistry, event: &str, data: Value) {
    let delivered = sessions.notify_all(&bridge_event(event, data));
    tracing::debug!(event, delivered, "Bridge event announced");
}

/// WebSocket upgrade handler for `/bridge`.
pub async fn bridge_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let presented = headers
        .get(BRIDGE_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    let authorized = match (state.auth.bridge_key.as_deref(), presented) {
        (Some(expected), Some(presented)) => secret_matches(presented, expected),
        _ => false,
    };

    ws.on_upgrade(move |socket| async move {
        if authorized {
            serve_agent(socket, state).await;
        } else {
            reject(socket).await;
        }
    })
}

async fn reject(mut socket: WebSocket) {
    tracing::warn!("Rejected bridge agent with missing or invalid key");
    let frame = CloseFrame {
        code: CLOSE_UNAUTHORIZED,
        reason: "Unauthorized".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!("Failed to send close frame: {e}");
    }
}

async fn serve_agent(socket: WebSocket, state: AppState) {
    let AppState {
        gateway, sessions, ..
    } = state;
    let (mut sender, mut receiver) = socket.split();

    // Outbound frames queue here; the link handle owns the sending side
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = LinkHandle::new(tx);
    gateway.attach(Arc::clone(&handle));
    announce(&sessions, "connected", json!({"link_id": handle.id()}));

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    tracing::warn!(link_id = %handle.id(), "Dropping non-UTF-8 bridge frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("Bridge socket error: {e}");
                break;
            }
        };
        match gateway.handle_inbound(&handle, &text) {
            InboundOutcome::Registered(info) => {
                announce(&sessions, "registered", json!({"link_id": handle.id(), "agent": info}));
            }
            InboundOutcome::Unrecognized => {
                tracing::debug!(link_id = %handle.id(), "Ignoring unrecognized bridge frame");
            }
            InboundOutcome::Settled(_) | InboundOutcome::Unmatched(_) | InboundOutcome::Malformed(_) => {}
        }
    }

    if gateway.link_lost(&handle) {
        announce(&sessions, "disconnected", json!({"link_id": handle.id()}));
    }
    send_task.abort();
}
