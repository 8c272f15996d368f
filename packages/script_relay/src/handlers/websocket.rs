use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws::handle_agent_ws;

/// Agent WebSocket endpoint - every upgraded socket joins the broadcast set
pub async fn agent_websocket_handler(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let registry = state.registry.clone();
    let metrics = state.metrics.clone();
    let outbound_capacity = state.config.outbound_queue;

    upgrade.on_upgrade(move |socket| handle_agent_ws(socket, registry, metrics, outbound_capacity))
}
