//! WebSocket channel: one request or response per message, CBOR in Binary
//! frames or JSON in Text frames depending on the configured wire format.

use futures_util::{SinkExt, StreamExt};
use portway_core::codec::{cbor_decode, cbor_encode};
use portway_core::{TunnelError, TunnelRequest, TunnelResponse, TunnelResult, WireFormat};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub struct WsChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    format: WireFormat,
}

impl WsChannel {
    pub async fn connect(url: &str, format: WireFormat) -> TunnelResult<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TunnelError::Transport(e.to_string()))?;
        debug!(url, ?format, "channel connected");
        Ok(Self { ws, format })
    }

    pub async fn call(&mut self, request: TunnelRequest) -> TunnelResult<TunnelResponse> {
        let frame = match self.format {
            WireFormat::Binary => Message::Binary(cbor_encode(&request)?),
            WireFormat::Text => Message::Text(serde_json::to_string(&request)?),
        };
        self.ws
            .send(frame)
            .await
            .map_err(|e| TunnelError::Transport(e.to_string()))?;

        while let Some(message) = self.ws.next().await {
            match message.map_err(|e| TunnelError::Transport(e.to_string()))? {
                Message::Binary(payload) => return cbor_decode(&payload),
                Message::Text(payload) => {
                    return serde_json::from_str(&payload).map_err(Into::into)
                }
                Message::Ping(payload) => {
                    self.ws
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| TunnelError::Transport(e.to_string()))?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        Err(TunnelError::Transport("channel closed before response".into()))
    }
}
