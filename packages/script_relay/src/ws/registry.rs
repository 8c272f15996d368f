//! Connection Registry
//!
//! Tracks every live agent connection and hands out send handles for broadcast.
//!
//! The registry owns membership: the accept path inserts, and the accept path,
//! keep-alive monitor and dispatcher remove. Removal cancels the connection's
//! token, which both tears down the socket task and makes any still-held
//! `AgentHandle` refuse further sends.

use axum::extract::ws::{Message, Utf8Bytes};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DeliveryError;

/// Identifier assigned to an agent connection at handshake time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One frame queued for an agent's socket writer.
///
/// The writer completes `ack` once the frame has been written and flushed,
/// or with the transport error if the write failed.
#[derive(Debug)]
pub struct Outbound {
    pub message: Message,
    pub ack: oneshot::Sender<Result<(), DeliveryError>>,
}

/// Send capability for one agent.
///
/// Cheap to clone via `Arc`; broadcasts hold these outside the registry lock.
#[derive(Debug)]
pub struct AgentHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
    closed: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl AgentHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Token cancelled when the registry drops this connection
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue a text frame and wait until the socket writer confirms it.
    ///
    /// No timeout here; callers wrap this in `tokio::time::timeout`.
    pub async fn deliver(&self, text: Utf8Bytes) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }

        let (ack, ack_rx) = oneshot::channel();
        let frame = Outbound {
            message: Message::Text(text),
            ack,
        };

        tokio::select! {
            sent = self.outbound.send(frame) => {
                sent.map_err(|_| DeliveryError::Closed)?;
            }
            _ = self.closed.cancelled() => return Err(DeliveryError::Closed),
        }

        tokio::select! {
            result = ack_rx => result.unwrap_or(Err(DeliveryError::Closed)),
            _ = self.closed.cancelled() => Err(DeliveryError::Closed),
        }
    }
}

struct RegistryEntry {
    handle: Arc<AgentHandle>,
    /// Last `pong`, or registration time until the first one arrives
    last_seen: Instant,
}

/// Concurrency-safe map of live agent connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, RegistryEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly upgraded connection whose writer drains `outbound`.
    pub async fn register(&self, outbound: mpsc::Sender<Outbound>) -> Arc<AgentHandle> {
        let handle = Arc::new(AgentHandle {
            id: ConnectionId::new(),
            outbound,
            closed: CancellationToken::new(),
            connected_at: Utc::now(),
        });

        let total = {
            let mut conns = self.connections.write().await;
            conns.insert(
                handle.id,
                RegistryEntry {
                    handle: handle.clone(),
                    last_seen: Instant::now(),
                },
            );
            conns.len()
        };

        info!(conn_id = %handle.id, total, "Client connected");
        handle
    }

    /// Remove a connection and close its handle.
    ///
    /// Returns false if the id was already gone, so racing removals from the
    /// accept, keep-alive and dispatch paths are harmless.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut conns = self.connections.write().await;
            let removed = conns.remove(&id);
            (removed, conns.len())
        };
        self.finish_removal(id, removed, total)
    }

    /// Remove a connection only if it is still silent for longer than `timeout`.
    ///
    /// Liveness is re-read under the write lock, so a `pong` recorded after
    /// `silent_for` picked this id keeps the connection.
    pub async fn unregister_if_silent(&self, id: ConnectionId, timeout: Duration) -> bool {
        let (removed, total) = {
            let mut conns = self.connections.write().await;
            let still_silent = conns
                .get(&id)
                .is_some_and(|e| e.last_seen.elapsed() > timeout);
            let removed = if still_silent { conns.remove(&id) } else { None };
            (removed, conns.len())
        };
        self.finish_removal(id, removed, total)
    }

    fn finish_removal(&self, id: ConnectionId, removed: Option<RegistryEntry>, total: usize) -> bool {
        match removed {
            Some(entry) => {
                entry.handle.closed.cancel();
                let connected_secs = (Utc::now() - entry.handle.connected_at).num_seconds();
                info!(conn_id = %id, total, connected_secs, "Client disconnected");
                true
            }
            None => {
                debug!(conn_id = %id, "Connection not removed (gone or answered)");
                false
            }
        }
    }

    /// Point-in-time copy of all live handles.
    ///
    /// The lock is only held while cloning the `Arc`s.
    pub async fn snapshot(&self) -> Vec<Arc<AgentHandle>> {
        let conns = self.connections.read().await;
        conns.values().map(|e| e.handle.clone()).collect()
    }

    /// Send `text` to every connection in a fresh snapshot, concurrently.
    ///
    /// Each send is bounded by `timeout`; one result per snapshot entry, so
    /// the returned length is the number of connections attempted.
    pub async fn deliver_all(
        &self,
        text: Utf8Bytes,
        timeout: Duration,
    ) -> Vec<(ConnectionId, Result<(), DeliveryError>)> {
        let handles = self.snapshot().await;
        futures::future::join_all(handles.iter().map(|handle| {
            let text = text.clone();
            async move {
                let result = tokio::time::timeout(timeout, handle.deliver(text))
                    .await
                    .unwrap_or(Err(DeliveryError::TimedOut));
                (handle.id(), result)
            }
        }))
        .await
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    #[cfg(test)]
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Refresh a connection's liveness after a `pong`.
    pub async fn record_pong(&self, id: ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(&id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Connections that have not answered within `timeout`.
    pub async fn silent_for(&self, timeout: Duration) -> Vec<ConnectionId> {
        let conns = self.connections.read().await;
        conns
            .iter()
            .filter(|(_, e)| e.last_seen.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect()
    }
}
