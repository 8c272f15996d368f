//! Script relay server.
//!
//! Accepts a file path over HTTP and broadcasts the file's contents to every
//! executor agent connected over WebSocket.
//!
//!   curl -X POST http://localhost:13377/execute_file -d "C:\path\to\script.lua"

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod broadcast;
mod config;
mod error;
mod handlers;
mod metrics;
mod script;
mod ws;

#[cfg(test)]
mod test_helpers;

use crate::broadcast::Broadcaster;
use crate::config::{CliOverrides, FileConfig, RelayConfig};
use crate::metrics::ServerMetrics;
use crate::ws::{ConnectionRegistry, KeepAliveMonitor};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "script-relay")]
#[command(about = "Broadcast script files to WebSocket-connected executor agents")]
struct Cli {
    /// Host for both the HTTP and WebSocket listeners
    #[arg(long)]
    host: Option<String>,

    /// Port for the HTTP control endpoint (default 13377)
    #[arg(long)]
    http_port: Option<u16>,

    /// Port agents connect to (default 13378)
    #[arg(long)]
    ws_port: Option<u16>,

    /// Config file (defaults to ~/.script-relay/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub config: Arc<RelayConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(ServerMetrics::new());
        let broadcaster = Arc::new(Broadcaster::new(
            registry.clone(),
            metrics.clone(),
            config.send_timeout,
        ));
        Self {
            registry,
            broadcaster,
            config: Arc::new(config),
            metrics,
        }
    }
}

/// Operator-facing routes
pub(crate) fn http_router(state: AppState) -> Router {
    Router::new()
        .route("/execute_file", post(handlers::execute_file_handler))
        .route("/status", get(handlers::status_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Agent-facing routes; agents connect to the bare root
pub(crate) fn agent_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::agent_websocket_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "script_relay=debug,tower_http=debug,info"
    } else {
        "script_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config_path = cli.config.clone().or_else(config::default_config_path);
    let file_config: FileConfig = config::load_config(config_path.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    let file_config = file_config.apply_overrides(&CliOverrides {
        host: cli.host,
        http_port: cli.http_port,
        ws_port: cli.ws_port,
    });
    let config = RelayConfig::from_file(&file_config);

    info!("Starting script relay");
    info!(
        "Keep-alive: ping every {}s, timeout {}",
        config.keepalive.ping_interval.as_secs(),
        config
            .keepalive
            .pong_timeout
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "disabled".to_string())
    );
    info!("Allowed extensions: {:?}", config.extensions.allowed);

    let state = AppState::new(config);

    let http_listener = tokio::net::TcpListener::bind(state.config.http_addr())
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", state.config.http_addr()))?;
    let ws_listener = tokio::net::TcpListener::bind(state.config.ws_addr())
        .await
        .with_context(|| format!("Failed to bind WebSocket listener on {}", state.config.ws_addr()))?;
    let http_addr = http_listener.local_addr()?;
    let ws_addr = ws_listener.local_addr()?;

    let shutdown = CancellationToken::new();

    // Keep-alive monitor
    let monitor = KeepAliveMonitor::new(
        state.registry.clone(),
        state.metrics.clone(),
        state.config.keepalive,
    );
    let monitor_task = tokio::spawn(monitor.run(shutdown.child_token()));

    // Ctrl+C flips the shared shutdown token
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal, cleaning up..."),
                Err(e) => {
                    warn!("Failed to install Ctrl+C handler: {}", e);
                    return;
                }
            }
            shutdown.cancel();
        });
    }

    info!("HTTP server: http://{}", http_addr);
    info!("WebSocket server: ws://{}", ws_addr);
    info!("API endpoints:");
    info!("  POST /execute_file  - Broadcast a script file (body: absolute path)");
    info!("  GET  /status        - Connected client count");
    info!("  GET  /metrics       - Server metrics");
    info!(
        r#"Example: curl -X POST http://{}/execute_file -d "C:\path\to\script.lua""#,
        http_addr
    );
    info!("Waiting for executor clients to connect...");

    let http_server = axum::serve(http_listener, http_router(state.clone()))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let ws_server = axum::serve(ws_listener, agent_router(state.clone()))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let server_result = tokio::try_join!(
        async { http_server.await.context("HTTP server error") },
        async { ws_server.await.context("WebSocket server error") },
    );

    // Either server failing takes the other down with it
    shutdown.cancel();
    if let Err(e) = monitor_task.await {
        warn!("Keep-alive monitor did not stop cleanly: {}", e);
    }

    info!(
        "Shutdown complete ({} clients were connected)",
        state.registry.count().await
    );
    server_result.map(|_| ())
}
