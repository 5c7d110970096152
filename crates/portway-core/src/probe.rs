//! Socket liveness probe shared by the tunnel service and the gateway.
//!
//! A socket that reports readable with zero bytes buffered has been closed
//! by its peer; one that stays unreadable through the probe window is alive
//! with nothing pending. Faults surface as explicit IO errors rather than
//! being folded into the disconnect case.

use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

/// Outcome of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub alive: bool,
    pub data_available: bool,
}

/// Probe `stream` for up to `window` without consuming any bytes.
pub async fn probe(stream: &TcpStream, window: Duration) -> io::Result<ProbeReport> {
    let mut buf = [0u8; 1];
    match time::timeout(window, stream.peek(&mut buf)).await {
        // Not readable within the window: alive, nothing buffered.
        Err(_) => Ok(ProbeReport {
            alive: true,
            data_available: false,
        }),
        // Readable with zero bytes: peer closed.
        Ok(Ok(0)) => Ok(ProbeReport {
            alive: false,
            data_available: false,
        }),
        Ok(Ok(_)) => Ok(ProbeReport {
            alive: true,
            data_available: true,
        }),
        Ok(Err(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const WINDOW: Duration = Duration::from_millis(100);

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn idle_socket_is_alive_without_data() {
        let (probed, _peer) = socket_pair().await;
        let report = probe(&probed, WINDOW).await.unwrap();
        assert!(report.alive);
        assert!(!report.data_available);
    }

    #[tokio::test]
    async fn buffered_data_is_reported() {
        let (probed, mut peer) = socket_pair().await;
        peer.write_all(b"x").await.unwrap();
        let report = probe(&probed, WINDOW).await.unwrap();
        assert!(report.alive);
        assert!(report.data_available);
    }

    #[tokio::test]
    async fn closed_peer_is_dead() {
        let (probed, peer) = socket_pair().await;
        drop(peer);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = probe(&probed, WINDOW).await.unwrap();
        assert!(!report.alive);
    }
}
