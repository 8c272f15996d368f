//! Server metrics for observability
//!
//! Process-lifetime counters for agent connections, dispatches and deliveries.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Agent sockets currently open
    pub active_connections: AtomicU64,
    /// Agent sockets accepted since server start
    pub total_connections: AtomicU64,
    /// Connections dropped by the keep-alive monitor
    pub keepalive_evictions: AtomicU64,

    // Dispatch metrics
    /// `/execute_file` requests that reached the broadcast step
    pub dispatches_accepted: AtomicU64,
    /// `/execute_file` requests refused before broadcasting
    pub dispatches_rejected: AtomicU64,
    /// Per-connection sends confirmed by the socket writer
    pub deliveries_succeeded: AtomicU64,
    /// Per-connection sends that errored or timed out
    pub deliveries_failed: AtomicU64,

    // Message metrics
    /// Text frames received from agents
    pub messages_received: AtomicU64,
    /// Keep-alive pings sent
    pub pings_sent: AtomicU64,

    // Error metrics
    /// WebSocket read errors
    pub websocket_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn keepalive_eviction(&self) {
        self.keepalive_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_accepted(&self) {
        self.dispatches_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_rejected(&self) {
        self.dispatches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_succeeded(&self) {
        self.deliveries_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_error(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                keepalive_evictions: self.keepalive_evictions.load(Ordering::Relaxed),
            },
            dispatches: DispatchMetrics {
                accepted: self.dispatches_accepted.load(Ordering::Relaxed),
                rejected: self.dispatches_rejected.load(Ordering::Relaxed),
                deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
                deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                pings_sent: self.pings_sent.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                websocket: self.websocket_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub dispatches: DispatchMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub keepalive_evictions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMetrics {
    pub accepted: u64,
    pub rejected: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub pings_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub websocket: u64,
}
