//! Agent WebSocket Side
//!
//! Everything that touches agent connections:
//! - the registry of live connections and their send handles
//! - the per-connection socket task
//! - the keep-alive monitor
//! - the JSON envelopes exchanged with agents

mod handler;
mod keepalive;
mod protocol;
mod registry;

pub use handler::handle_agent_ws;
pub use keepalive::{KeepAliveConfig, KeepAliveMonitor};
pub use protocol::ServerMessage;
pub use registry::ConnectionRegistry;
#[cfg(test)]
pub use registry::Outbound;
