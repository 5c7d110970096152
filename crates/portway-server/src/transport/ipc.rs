//! Local IPC transport listener: Unix domain socket, length-prefixed CBOR
//! frames. Same-machine client/server pairs only.

use crate::service::TunnelService;
use portway_core::codec::{frame_encode, FrameDecoder};
use portway_core::{TunnelRequest, TunnelResult};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Accept loop over a Unix socket; one spawned handler per channel.
pub async fn serve(
    path: &Path,
    service: Arc<TunnelService>,
    mut shutdown: watch::Receiver<bool>,
) -> TunnelResult<()> {
    // A stale socket file from a previous run would fail the bind.
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "ipc listener started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_channel(stream, service).await {
                                debug!(error = %e, "ipc channel ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }

    let _ = std::fs::remove_file(path);
    info!("ipc listener stopped");
    Ok(())
}

/// Sequential request/response cycle over framed CBOR.
async fn handle_channel(mut stream: UnixStream, service: Arc<TunnelService>) -> TunnelResult<()> {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for request in decoder.feed::<TunnelRequest>(&buf[..n])? {
            debug!(op = request.op(), "request");
            let response = service.dispatch(request).await;
            stream.write_all(&frame_encode(&response)?).await?;
        }
    }

    Ok(())
}
