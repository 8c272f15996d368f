use axum::extract::ws::Message;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::AppState;
use crate::config::{FileConfig, RelayConfig};
use crate::error::DeliveryError;
use crate::ws::Outbound;

/// Build a fully-wired `AppState` with short timeouts and no agents.
///
/// Returns `(AppState, TempDir)`; the `TempDir` is a scratch area for script
/// fixtures and must outlive the test.
pub async fn test_app_state() -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir");

    let mut config = RelayConfig::from_file(&FileConfig::default());
    config.send_timeout = Duration::from_millis(250);
    config.keepalive.send_timeout = config.send_timeout;

    (AppState::new(config), tmp)
}

/// In-process agent: acknowledges every frame and exposes the text it got.
pub struct FakeAgent {
    pub frames: mpsc::UnboundedReceiver<String>,
}

/// Register an agent whose socket accepts every frame.
pub async fn attach_agent(state: &AppState) -> FakeAgent {
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.outbound_queue);
    state.registry.register(tx).await;

    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Message::Text(text) = &frame.message {
                let _ = seen_tx.send(text.as_str().to_string());
            }
            let _ = frame.ack.send(Ok(()));
        }
    });

    FakeAgent { frames: seen_rx }
}

/// Register an agent whose socket fails every write.
pub async fn attach_broken_agent(state: &AppState) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.outbound_queue);
    state.registry.register(tx).await;

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let _ = frame
                .ack
                .send(Err(DeliveryError::Transport("connection reset".into())));
        }
    });
}
