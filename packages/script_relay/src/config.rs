use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::script::ExtensionPolicy;
use crate::ws::KeepAliveConfig;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [server]
//                    http_port = 9000
//
//   env var:         RELAY_SERVER__HTTP_PORT=9000   (double underscore = nesting)
//
// CLI flags (--host, --http-port, --ws-port) are applied last.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub keepalive: KeepAliveFileConfig,
    #[serde(default)]
    pub dispatch: DispatchFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    /// Bind host shared by the HTTP and WebSocket listeners
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
        }
    }
}

/// Liveness probing (lives under `[keepalive]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeepAliveFileConfig {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// 0 disables eviction of silent agents
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

impl Default for KeepAliveFileConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

/// Broadcast and request validation (lives under `[dispatch]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchFileConfig {
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub case_insensitive_extensions: bool,
    /// Per-agent outbound frame queue
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for DispatchFileConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            allowed_extensions: default_allowed_extensions(),
            case_insensitive_extensions: false,
            outbound_queue: default_outbound_queue(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_http_port() -> u16 {
    13377
}
fn default_ws_port() -> u16 {
    13378
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_pong_timeout_secs() -> u64 {
    90
}
fn default_send_timeout_ms() -> u64 {
    5000
}
fn default_allowed_extensions() -> Vec<String> {
    vec![".lua".to_string(), ".luau".to_string(), ".txt".to_string()]
}
fn default_outbound_queue() -> usize {
    64
}

/// `~/.script-relay/config.toml`, if a home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".script-relay").join("config.toml"))
}

/// Build a figment that layers: defaults → config.toml → RELAY_* env vars.
///
/// A missing config file is not an error; figment skips it.
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("RELAY_").split("__"))
}

/// Listener overrides taken from the command line.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub http_port: Option<u16>,
    pub ws_port: Option<u16>,
}

impl FileConfig {
    pub fn apply_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.http_port {
            self.server.http_port = port;
        }
        if let Some(port) = overrides.ws_port {
            self.server.ws_port = port;
        }
        self
    }
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub keepalive: KeepAliveConfig,
    /// Upper bound for one frame to one agent
    pub send_timeout: Duration,
    pub extensions: ExtensionPolicy,
    pub outbound_queue: usize,
}

impl RelayConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        let send_timeout = Duration::from_millis(fc.dispatch.send_timeout_ms.max(1));
        Self {
            host: fc.server.host.clone(),
            http_port: fc.server.http_port,
            ws_port: fc.server.ws_port,
            keepalive: KeepAliveConfig::new(
                Duration::from_secs(fc.keepalive.ping_interval_secs.max(1)),
                match fc.keepalive.pong_timeout_secs {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
                send_timeout,
            ),
            send_timeout,
            extensions: ExtensionPolicy {
                allowed: fc.dispatch.allowed_extensions.clone(),
                case_insensitive: fc.dispatch.case_insensitive_extensions,
            },
            outbound_queue: fc.dispatch.outbound_queue.max(1),
        }
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }
}
