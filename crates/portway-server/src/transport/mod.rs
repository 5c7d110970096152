//! Server-side transport listeners.
//!
//! One request/response contract, three closed variants selected by
//! configuration: `ws-binary`, `ws-text`, and `ipc`. Every variant decodes
//! a [`portway_core::TunnelRequest`], dispatches it into the service, and
//! writes the response back on the same channel.

#[cfg(unix)]
pub mod ipc;
pub mod ws;

use crate::config::ListenerConfig;
use crate::service::TunnelService;
use portway_core::TunnelResult;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Serve the configured transport variant until the shutdown signal fires.
pub async fn serve(
    listener: ListenerConfig,
    service: Arc<TunnelService>,
    shutdown: watch::Receiver<bool>,
) -> TunnelResult<()> {
    let format = listener.wire_format();
    match listener {
        ListenerConfig::WsBinary { bind } | ListenerConfig::WsText { bind } => {
            let tcp = TcpListener::bind(bind).await?;
            ws::serve(tcp, format, service, shutdown).await
        }
        #[cfg(unix)]
        ListenerConfig::Ipc { path } => ipc::serve(&path, service, shutdown).await,
        #[cfg(not(unix))]
        ListenerConfig::Ipc { .. } => Err(portway_core::TunnelError::Config(
            "ipc transport requires a unix platform".into(),
        )),
    }
}
