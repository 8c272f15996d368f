//! Keep-Alive Monitor
//!
//! Pings every agent on a fixed interval and evicts connections that stop
//! answering. Agents whose sockets die without a close frame would otherwise
//! stay in the registry and inflate `total_clients`.

use axum::extract::ws::Utf8Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::ServerMetrics;

use super::protocol::ServerMessage;
use super::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    pub ping_interval: Duration,
    /// `None` disables eviction by silence; failed pings still evict
    pub pong_timeout: Option<Duration>,
    pub send_timeout: Duration,
}

impl KeepAliveConfig {
    /// Build a config whose pong timeout can actually be met.
    ///
    /// An agent can only answer the previous sweep's ping, so its silence is
    /// always about one `ping_interval` long at the next sweep. Timeouts
    /// shorter than `ping_interval + send_timeout` are raised to that.
    pub fn new(
        ping_interval: Duration,
        pong_timeout: Option<Duration>,
        send_timeout: Duration,
    ) -> Self {
        let floor = ping_interval + send_timeout;
        let pong_timeout = pong_timeout.map(|timeout| {
            if timeout < floor {
                warn!(
                    pong_timeout_ms = timeout.as_millis() as u64,
                    ping_interval_ms = ping_interval.as_millis() as u64,
                    adjusted_ms = floor.as_millis() as u64,
                    "Pong timeout shorter than ping interval plus send timeout, raising it"
                );
                floor
            } else {
                timeout
            }
        });
        Self {
            ping_interval,
            pong_timeout,
            send_timeout,
        }
    }
}

/// Outcome of one keep-alive round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted_silent: usize,
    pub pinged: usize,
    pub ping_failures: usize,
}

pub struct KeepAliveMonitor {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
    config: KeepAliveConfig,
}

impl KeepAliveMonitor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<ServerMetrics>,
        config: KeepAliveConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            config,
        }
    }

    /// Run sweeps until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        // A slow sweep must not be followed by a burst of catch-up pings
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; nobody is connected yet
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.sweep().await;
                    debug!(
                        pinged = report.pinged,
                        ping_failures = report.ping_failures,
                        evicted = report.evicted_silent,
                        "Keep-alive sweep"
                    );
                }
                _ = cancel.cancelled() => {
                    debug!("Keep-alive monitor stopped");
                    break;
                }
            }
        }
    }

    /// Evict silent connections, then ping the rest concurrently.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if let Some(timeout) = self.config.pong_timeout {
            for id in self.registry.silent_for(timeout).await {
                if self.registry.unregister_if_silent(id, timeout).await {
                    info!(conn_id = %id, timeout_secs = timeout.as_secs(), "Client timed out (no pong)");
                    self.metrics.keepalive_eviction();
                    report.evicted_silent += 1;
                }
            }
        }

        let ping = match ServerMessage::Ping.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                warn!(error = %e, "Failed to serialize ping");
                return report;
            }
        };

        let results = self
            .registry
            .deliver_all(ping, self.config.send_timeout)
            .await;
        report.pinged = results.len();

        for (id, result) in results {
            self.metrics.ping_sent();
            if let Err(e) = result {
                warn!(conn_id = %id, error = %e, "Ping failed, dropping client");
                if self.registry.unregister(id).await {
                    self.metrics.keepalive_eviction();
                }
                report.ping_failures += 1;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::registry::Outbound;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn monitor(
        registry: Arc<ConnectionRegistry>,
        pong_timeout: Option<Duration>,
    ) -> KeepAliveMonitor {
        KeepAliveMonitor::new(
            registry,
            Arc::new(ServerMetrics::new()),
            KeepAliveConfig {
                ping_interval: Duration::from_millis(20),
                pong_timeout,
                send_timeout: Duration::from_millis(100),
            },
        )
    }

    /// Fake agent socket that acks every frame and forwards its text.
    fn spawn_acking(mut rx: mpsc::Receiver<Outbound>) -> mpsc::UnboundedReceiver<String> {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Message::Text(text) = &frame.message {
                    let _ = seen_tx.send(text.as_str().to_string());
                }
                let _ = frame.ack.send(Ok(()));
            }
        });
        seen_rx
    }

    #[tokio::test]
    async fn test_sweep_pings_every_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx_a, rx_a) = mpsc::channel(4);
        let (tx_b, rx_b) = mpsc::channel(4);
        registry.register(tx_a).await;
        registry.register(tx_b).await;
        let mut seen_a = spawn_acking(rx_a);
        let mut seen_b = spawn_acking(rx_b);

        let report = monitor(registry.clone(), None).sweep().await;

        assert_eq!(
            report,
            SweepReport {
                evicted_silent: 0,
                pinged: 2,
                ping_failures: 0
            }
        );
        assert_eq!(seen_a.recv().await.unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(seen_b.recv().await.unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn test_sweep_evicts_silent_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx_silent, rx_silent) = mpsc::channel(4);
        let (tx_live, rx_live) = mpsc::channel(4);
        let silent = registry.register(tx_silent).await;
        let live = registry.register(tx_live).await;
        let _seen_silent = spawn_acking(rx_silent);
        let _seen_live = spawn_acking(rx_live);

        tokio::time::sleep(Duration::from_millis(80)).await;
        registry.record_pong(live.id()).await;

        let report = monitor(registry.clone(), Some(Duration::from_millis(50)))
            .sweep()
            .await;

        assert_eq!(report.evicted_silent, 1);
        assert_eq!(report.pinged, 1);
        assert!(!registry.contains(silent.id()).await);
        assert!(registry.contains(live.id()).await);
        assert!(silent.is_closed());
    }

    #[tokio::test]
    async fn test_sweep_drops_connection_whose_ping_fails() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx_dead, rx_dead) = mpsc::channel(4);
        let (tx_live, rx_live) = mpsc::channel(4);
        let dead = registry.register(tx_dead).await;
        registry.register(tx_live).await;
        drop(rx_dead);
        let _seen = spawn_acking(rx_live);

        let report = monitor(registry.clone(), None).sweep().await;

        assert_eq!(report.ping_failures, 1);
        assert_eq!(registry.count().await, 1);
        assert!(!registry.contains(dead.id()).await);
    }

    #[tokio::test]
    async fn test_sweep_times_out_hung_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        // Writer accepts frames but never acknowledges them
        let (tx_hung, mut rx_hung) = mpsc::channel::<Outbound>(4);
        let hung = registry.register(tx_hung).await;
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Some(frame) = rx_hung.recv().await {
                held.push(frame);
            }
        });

        let report = monitor(registry.clone(), None).sweep().await;

        assert_eq!(report.ping_failures, 1);
        assert!(!registry.contains(hung.id()).await);
    }

    #[test]
    fn test_new_raises_unreachable_pong_timeout() {
        let config = KeepAliveConfig::new(
            Duration::from_secs(30),
            Some(Duration::from_secs(20)),
            Duration::from_secs(5),
        );
        assert_eq!(config.pong_timeout, Some(Duration::from_secs(35)));

        let config = KeepAliveConfig::new(
            Duration::from_secs(30),
            Some(Duration::from_secs(90)),
            Duration::from_secs(5),
        );
        assert_eq!(config.pong_timeout, Some(Duration::from_secs(90)));

        let config = KeepAliveConfig::new(Duration::from_secs(30), None, Duration::from_secs(5));
        assert_eq!(config.pong_timeout, None);
    }

    #[tokio::test]
    async fn test_responsive_agent_survives_many_ticks() {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(ServerMetrics::new());

        // Answers every ping with a pong, like a healthy agent
        let (tx_live, mut rx_live) = mpsc::channel::<Outbound>(4);
        let live_id = registry.register(tx_live).await.id();
        let pong_registry = registry.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx_live.recv().await {
                let _ = frame.ack.send(Ok(()));
                pong_registry.record_pong(live_id).await;
            }
        });

        // Takes pings but never answers
        let (tx_silent, rx_silent) = mpsc::channel(4);
        let silent = registry.register(tx_silent).await;
        let _seen = spawn_acking(rx_silent);

        // Requested timeout is below the ping interval and gets raised to 200ms
        let config = KeepAliveConfig::new(
            Duration::from_millis(100),
            Some(Duration::from_millis(50)),
            Duration::from_millis(100),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            KeepAliveMonitor::new(registry.clone(), metrics.clone(), config).run(cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(800)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(registry.contains(live_id).await);
        assert!(!registry.contains(silent.id()).await);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.keepalive_evictions, 1);
        assert!(snapshot.messages.pings_sent >= 5);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::channel(4);
        registry.register(tx).await;
        let mut seen = spawn_acking(rx);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor(registry, None).run(cancel.clone()));

        let first = tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .expect("no ping within timeout");
        assert_eq!(first.as_deref(), Some(r#"{"type":"ping"}"#));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
