//! Agent WebSocket Handler
//!
//! Owns one agent socket from upgrade to close: registers it, runs the writer
//! that drains the registry's outbound queue, and reads agent frames.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::metrics::ServerMetrics;

use super::protocol::AgentMessage;
use super::registry::{ConnectionRegistry, Outbound};

/// Handle an agent connection until it closes or the registry drops it
pub async fn handle_agent_ws(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
    outbound_capacity: usize,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(outbound_capacity.max(1));

    let handle = registry.register(tx).await;
    let connection_id = handle.id();
    let closed = handle.closed_token();
    // The registry holds the only long-lived reference; keeping ours would
    // keep the outbound channel open after removal.
    drop(handle);
    metrics.connection_opened();

    let sender_task = async move {
        while let Some(Outbound { message, ack }) = rx.recv().await {
            let result = ws_sender
                .send(message)
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()));
            let failed = result.is_err();
            let _ = ack.send(result);
            if failed {
                break;
            }
        }
    };

    let registry_input = registry.clone();
    let metrics_input = metrics.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics_input.message_received();
                    match serde_json::from_str::<AgentMessage>(text.as_str()) {
                        Ok(AgentMessage::Pong) => {
                            registry_input.record_pong(connection_id).await;
                        }
                        Ok(AgentMessage::Unknown) => {
                            debug!(conn_id = %connection_id, "Ignoring message from client: {}", text.as_str());
                        }
                        Err(e) => {
                            debug!(conn_id = %connection_id, error = %e, "Unparseable message from client");
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    debug!(conn_id = %connection_id, "Ignoring binary message from client");
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(conn_id = %connection_id, error = %e, "WebSocket read error");
                    metrics_input.websocket_error();
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(conn_id = %connection_id, "Sender task ended"),
        _ = input_task => debug!(conn_id = %connection_id, "Input task ended"),
        _ = closed.cancelled() => debug!(conn_id = %connection_id, "Connection evicted"),
    }

    registry.unregister(connection_id).await;
    metrics.connection_closed();
}
