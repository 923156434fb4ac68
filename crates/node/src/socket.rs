//! The client socket endpoint: one WebSocket per `(user_id, device_id)`,
//! owned for its whole lifetime.
//!
//! Lifecycle: accept → table insert + mark online → serve frames →
//! table delete + mark offline. Malformed frames get a literal error text
//! and never close the socket.

use std::sync::Arc;

use {
    axum::{
        extract::{
            Path, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::IntoResponse,
    },
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use parley_protocol::{SendFrame, epoch_now, frame_errors};

use crate::NodeContext;

/// `GET /ws/{user_id}/{device_id}`: upgrade and serve.
pub async fn ws_route(
    State(context): State<Arc<NodeContext>>,
    Path((user_id, device_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, context, user_id, device_id))
}

/// Serve one device socket through its full lifecycle.
pub async fn handle_socket(
    socket: WebSocket,
    context: Arc<NodeContext>,
    user_id: String,
    device_id: String,
) {
    info!(user_id, device_id, node_id = %context.node_id, "ws: device connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

    // Write loop: everything addressed to this device funnels through one
    // sender, consumer deliveries and error frames alike.
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    context.table.insert(&user_id, &device_id, frame_tx.clone()).await;
    if let Err(e) = context
        .presence
        .mark_online(&user_id, &device_id, &context.node_id)
        .await
    {
        warn!(user_id, device_id, error = %e, "presence: mark_online failed");
    }

    while let Some(received) = ws_rx.next().await {
        let text = match received {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(user_id, device_id, error = %e, "ws: read error");
                break;
            },
        };

        let frame: SendFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => {
                let _ = frame_tx.send(frame_errors::INVALID_JSON.to_string());
                continue;
            },
        };
        let message = match frame.stamp(&user_id, &device_id, epoch_now()) {
            Ok(message) => message,
            Err(error_text) => {
                let _ = frame_tx.send(error_text.to_string());
                continue;
            },
        };

        // A failed enqueue is logged and the loop continues; the client
        // retries by resending.
        if let Err(e) = context.distributor.dispatch(&message).await {
            warn!(
                user_id,
                device_id,
                conversation_id = %message.conversation_id,
                error = %e,
                "send: dispatch failed"
            );
        }
    }

    context.table.remove(&user_id, &device_id).await;
    if let Err(e) = context
        .presence
        .mark_offline(&user_id, &device_id, &context.node_id)
        .await
    {
        warn!(user_id, device_id, error = %e, "presence: mark_offline failed");
    }

    write_handle.abort();
    info!(user_id, device_id, "ws: device disconnected");
}
