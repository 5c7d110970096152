//! Server configuration: TOML file + CLI overrides.
//!
//! The `[server]` section selects the transport variant the server listens
//! on; `[users.<name>]` tables hold the credential and timeout entries the
//! tunnel service authenticates against.

use portway_core::{TunnelError, TunnelResult, WireFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Compiled default session timeout, hours.
pub const DEFAULT_SESSION_TIMEOUT_HOURS: u64 = 12;
/// Compiled default connection timeout, hours.
pub const DEFAULT_CONNECTION_TIMEOUT_HOURS: u64 = 1;

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_listener")]
    pub server: ListenerConfig,
    #[serde(default)]
    pub users: HashMap<String, UserConfig>,
}

/// `[server]` section: one typed struct per transport variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "kebab-case")]
pub enum ListenerConfig {
    /// WebSocket carrier, CBOR payloads.
    WsBinary { bind: SocketAddr },
    /// WebSocket carrier, JSON payloads.
    WsText { bind: SocketAddr },
    /// Unix-domain-socket carrier, framed CBOR. Same machine only.
    Ipc { path: PathBuf },
}

impl ListenerConfig {
    /// Payload encoding this listener speaks.
    pub fn wire_format(&self) -> WireFormat {
        match self {
            Self::WsBinary { .. } | Self::Ipc { .. } => WireFormat::Binary,
            Self::WsText { .. } => WireFormat::Text,
        }
    }
}

fn default_listener() -> ListenerConfig {
    ListenerConfig::WsBinary {
        bind: default_bind(),
    }
}

fn default_bind() -> SocketAddr {
    "127.0.0.1:8765".parse().expect("static default bind")
}

/// One `[users.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub enabled: bool,
    pub password: String,
    #[serde(default)]
    pub admin: bool,
    /// Session timeout override, hours.
    pub stimeout: Option<u64>,
    /// Connection timeout override, hours.
    pub ctimeout: Option<u64>,
}

/// Resolved server configuration (file + CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listener: ListenerConfig,
    pub users: HashMap<String, UserConfig>,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(path: &Path, cli_bind: Option<SocketAddr>) -> TunnelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let file: ConfigFile = toml::from_str(&content)
            .map_err(|e| TunnelError::Config(format!("config parse error: {e}")))?;
        info!(path = %path.display(), users = file.users.len(), "config loaded");

        let listener = match (file.server, cli_bind) {
            (ListenerConfig::WsBinary { .. }, Some(bind)) => ListenerConfig::WsBinary { bind },
            (ListenerConfig::WsText { .. }, Some(bind)) => ListenerConfig::WsText { bind },
            (listener, _) => listener,
        };

        Ok(Self {
            listener,
            users: file.users,
        })
    }
}
