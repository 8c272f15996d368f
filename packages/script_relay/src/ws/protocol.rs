//! Agent Wire Protocol
//!
//! JSON text frames exchanged with agents over the WebSocket. Both directions
//! are internally tagged on `type`.

use serde::{Deserialize, Serialize};

/// Messages sent from the server to agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Script payload the agent should run
    Execute {
        script: String,
        filename: String,
        timestamp: String,
    },
    /// Liveness probe, answered with `pong`
    Ping,
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages received from agents.
///
/// Any `type` other than `pong` lands in `Unknown` so that newer agents never
/// get disconnected for speaking a dialect we don't know.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Pong,
    #[serde(other)]
    Unknown,
}
