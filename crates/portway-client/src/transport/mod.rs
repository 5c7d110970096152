//! Client-side transport channels.
//!
//! The same closed variant set as the server: `ws-binary`, `ws-text`, and
//! `ipc`, selected by configuration with a typed struct per variant.
//! Channels are enum-dispatched rather than `dyn` (async methods are not
//! object-safe).

#[cfg(unix)]
pub mod ipc;
pub mod ws;

use portway_core::{TunnelRequest, TunnelResponse, TunnelResult, WireFormat};
use serde::Deserialize;
use std::path::PathBuf;

/// Which channel to open, one typed struct per variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "kebab-case")]
pub enum ChannelConfig {
    /// WebSocket carrier, CBOR payloads.
    WsBinary { url: String },
    /// WebSocket carrier, JSON payloads.
    WsText { url: String },
    /// Unix-domain-socket carrier, framed CBOR. Same machine only.
    Ipc { path: PathBuf },
}

/// Enum-dispatched tunnel channel.
pub enum AnyChannel {
    Ws(ws::WsChannel),
    #[cfg(unix)]
    Ipc(ipc::IpcChannel),
}

impl AnyChannel {
    /// Open the channel described by the configuration.
    pub async fn connect(config: &ChannelConfig) -> TunnelResult<Self> {
        match config {
            ChannelConfig::WsBinary { url } => {
                Ok(Self::Ws(ws::WsChannel::connect(url, WireFormat::Binary).await?))
            }
            ChannelConfig::WsText { url } => {
                Ok(Self::Ws(ws::WsChannel::connect(url, WireFormat::Text).await?))
            }
            #[cfg(unix)]
            ChannelConfig::Ipc { path } => Ok(Self::Ipc(ipc::IpcChannel::connect(path).await?)),
            #[cfg(not(unix))]
            ChannelConfig::Ipc { .. } => Err(portway_core::TunnelError::Config(
                "ipc transport requires a unix platform".into(),
            )),
        }
    }

    /// Issue one request and wait for its response.
    pub async fn call(&mut self, request: TunnelRequest) -> TunnelResult<TunnelResponse> {
        match self {
            Self::Ws(channel) => channel.call(request).await,
            #[cfg(unix)]
            Self::Ipc(channel) => channel.call(request).await,
        }
    }
}
