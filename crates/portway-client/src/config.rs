//! Client configuration: TOML file.
//!
//! The `[tunnel]` section selects the transport variant and carries the
//! credentials; each `[[forward]]` table maps one local listening port to a
//! remote endpoint reached through the tunnel.

use crate::transport::ChannelConfig;
use portway_core::{TunnelError, TunnelResult};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub tunnel: TunnelSection,
    #[serde(default, rename = "forward")]
    pub forwards: Vec<Forward>,
}

/// `[tunnel]` section: transport variant + credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSection {
    #[serde(flatten)]
    pub channel: ChannelConfig,
    pub username: String,
    pub password: String,
}

/// One `[[forward]]` rule.
#[derive(Debug, Clone, Deserialize)]
pub struct Forward {
    /// Local address to listen on.
    #[serde(default = "default_forward_bind")]
    pub bind: String,
    /// Local port to listen on.
    pub local_port: u16,
    /// Remote endpoint to dial through the tunnel.
    pub address: String,
    pub port: u16,
}

fn default_forward_bind() -> String {
    "127.0.0.1".to_string()
}

impl ClientConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> TunnelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| TunnelError::Config(format!("config parse error: {e}")))?;
        info!(path = %path.display(), forwards = config.forwards.len(), "config loaded");
        Ok(config)
    }
}
