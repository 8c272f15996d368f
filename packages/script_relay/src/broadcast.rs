//! Broadcast Dispatcher
//!
//! Fans a single serialized envelope out to every registered agent and
//! reports how many sockets accepted it.

use axum::extract::ws::Utf8Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::ServerMetrics;
use crate::ws::{ConnectionRegistry, ServerMessage};

/// Aggregate result of one broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub succeeded: usize,
    /// Snapshot size when the broadcast started. A send is attempted to every
    /// entry, so this is also the attempted count.
    pub total: usize,
}

impl DispatchOutcome {
    /// Every connection in the snapshot took the payload
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.succeeded == self.total
    }

    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }
}

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<ServerMetrics>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            send_timeout,
        }
    }

    /// Serialize `message` once and send it to every connection.
    pub async fn broadcast(&self, message: &ServerMessage) -> serde_json::Result<DispatchOutcome> {
        let json = message.to_json()?;
        Ok(self.broadcast_text(Utf8Bytes::from(json)).await)
    }

    /// Send a pre-encoded frame to every connection in a registry snapshot.
    ///
    /// Sends run concurrently, each bounded by the send timeout. Connections
    /// that fail or time out are unregistered and not counted as succeeded.
    pub async fn broadcast_text(&self, text: Utf8Bytes) -> DispatchOutcome {
        let results = self.registry.deliver_all(text, self.send_timeout).await;
        let total = results.len();
        if total == 0 {
            return DispatchOutcome {
                succeeded: 0,
                total: 0,
            };
        }

        let mut succeeded = 0;
        for (id, result) in results {
            match result {
                Ok(()) => {
                    succeeded += 1;
                    self.metrics.delivery_succeeded();
                }
                Err(e) => {
                    warn!(conn_id = %id, error = %e, "Failed to send to client");
                    self.metrics.delivery_failed();
                    self.registry.unregister(id).await;
                }
            }
        }

        debug!(succeeded, total, "Broadcast complete");
        DispatchOutcome { succeeded, total }
    }
}
