pub mod execute;
pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use execute::execute_file_handler;
pub use health::{health_live_handler, metrics_handler, status_handler};
pub use websocket::agent_websocket_handler;
