//! WebSocket transport listener.
//!
//! Carries one request or response per WebSocket message: CBOR in Binary
//! frames (`ws-binary`) or JSON in Text frames (`ws-text`). Frames that do
//! not match the configured format end the channel.

use crate::service::TunnelService;
use futures_util::{SinkExt, StreamExt};
use portway_core::codec::{cbor_decode, cbor_encode};
use portway_core::{TunnelError, TunnelRequest, TunnelResult, WireFormat};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Accept loop: one spawned handler per inbound channel.
pub async fn serve(
    listener: TcpListener,
    format: WireFormat,
    service: Arc<TunnelService>,
    mut shutdown: watch::Receiver<bool>,
) -> TunnelResult<()> {
    info!(addr = %listener.local_addr()?, ?format, "websocket listener started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let service = service.clone();
                        tokio::spawn(async move {
                            match tokio_tungstenite::accept_async(stream).await {
                                Ok(ws) => {
                                    if let Err(e) = handle_channel(ws, format, service).await {
                                        debug!(%peer, error = %e, "channel ended with error");
                                    }
                                }
                                Err(e) => warn!(%peer, error = %e, "websocket handshake failed"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }

    info!("websocket listener stopped");
    Ok(())
}

/// Sequential request/response cycle for one channel.
async fn handle_channel(
    ws: WebSocketStream<TcpStream>,
    format: WireFormat,
    service: Arc<TunnelService>,
) -> TunnelResult<()> {
    let (mut sink, mut source) = ws.split();

    while let Some(message) = source.next().await {
        let message = message.map_err(|e| TunnelError::Transport(e.to_string()))?;
        let request: TunnelRequest = match (format, message) {
            (WireFormat::Binary, Message::Binary(payload)) => cbor_decode(&payload)?,
            (WireFormat::Text, Message::Text(payload)) => serde_json::from_str(&payload)?,
            (_, Message::Ping(payload)) => {
                sink.send(Message::Pong(payload))
                    .await
                    .map_err(|e| TunnelError::Transport(e.to_string()))?;
                continue;
            }
            (_, Message::Pong(_)) => continue,
            (_, Message::Close(_)) => break,
            (_, other) => {
                return Err(TunnelError::Transport(format!(
                    "frame does not match the {format:?} wire format: {other:?}"
                )));
            }
        };

        debug!(op = request.op(), "request");
        let response = service.dispatch(request).await;
        let reply = match format {
            WireFormat::Binary => Message::Binary(cbor_encode(&response)?),
            WireFormat::Text => Message::Text(serde_json::to_string(&response)?),
        };
        sink.send(reply)
            .await
            .map_err(|e| TunnelError::Transport(e.to_string()))?;
    }

    Ok(())
}
