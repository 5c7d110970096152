//! Local IPC channel: Unix domain socket, length-prefixed CBOR frames.

use portway_core::codec::{frame_encode, FrameDecoder};
use portway_core::{TunnelError, TunnelRequest, TunnelResponse, TunnelResult};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

pub struct IpcChannel {
    stream: UnixStream,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

impl IpcChannel {
    pub async fn connect(path: &Path) -> TunnelResult<Self> {
        let stream = UnixStream::connect(path).await?;
        debug!(path = %path.display(), "channel connected");
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            buf: vec![0u8; 4096],
        })
    }

    pub async fn call(&mut self, request: TunnelRequest) -> TunnelResult<TunnelResponse> {
        self.stream.write_all(&frame_encode(&request)?).await?;

        // Calls are strictly sequential, so the next complete frame is the
        // response to this request.
        loop {
            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                return Err(TunnelError::Transport("channel closed before response".into()));
            }
            let mut responses: Vec<TunnelResponse> = self.decoder.feed(&self.buf[..n])?;
            if let Some(response) = responses.pop() {
                return Ok(response);
            }
        }
    }
}
