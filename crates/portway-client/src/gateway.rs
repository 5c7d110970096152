//! Gateway between one local socket and one tunneled connection.
//!
//! The tunnel contract is half-duplex request/response, so the gateway
//! emulates a full-duplex socket with an adaptive polling loop: every
//! iteration pushes buffered local bytes through Write and polls the remote
//! side with Read. Traffic in either direction snaps the poll interval back
//! to its minimum; idle iterations grow it geometrically so an inactive
//! tunnel costs little. Iteration wall-clock time is subtracted from the
//! next wait so channel latency does not inflate the polling cadence.

use crate::client::TunnelClient;
use portway_core::probe::probe;
use portway_core::scramble::scrambled;
use portway_core::{TunnelError, TunnelResult, BUFFER_SIZE};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Shortest wait between iterations (active mode).
pub const POLL_MIN: Duration = Duration::from_millis(10);
/// Longest wait between iterations (idle backoff cap).
pub const POLL_MAX: Duration = Duration::from_millis(5000);
/// Idle backoff growth factor.
pub const POLL_GROWTH: f64 = 1.1;
/// Window for the local-socket liveness probe.
const PROBE_WINDOW: Duration = Duration::from_millis(100);

/// One gateway per accepted local socket.
pub struct Gateway {
    tunnel: Arc<TunnelClient>,
    sid: i32,
    cid: i32,
    local: TcpStream,
}

impl Gateway {
    /// Dial the remote endpoint through the tunnel. A failed dial is
    /// terminal: the local socket is dropped and no loop starts.
    pub async fn open(
        tunnel: Arc<TunnelClient>,
        sid: i32,
        local: TcpStream,
        address: &str,
        port: u16,
    ) -> TunnelResult<Self> {
        let response = tunnel.connect(sid, address, port).await?;
        info!(message = %response.message, "tunnel connect");
        if !response.success {
            return Err(TunnelError::Connect(response.message));
        }
        Ok(Self {
            tunnel,
            sid,
            cid: response.cid,
            local,
        })
    }

    pub fn cid(&self) -> i32 {
        self.cid
    }

    /// Drive the polling loop until the connection dies on either side or
    /// the shutdown signal fires, then disconnect and release the socket.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut poll = POLL_MIN;
        let mut elapsed = Duration::ZERO;
        let mut stop = false;

        while !stop {
            // Wait out the poll interval, leaving early on shutdown. A
            // dropped sender counts as shutdown.
            if time::timeout(wait_time(poll, elapsed), shutdown.changed())
                .await
                .is_ok()
            {
                debug!(cid = self.cid, "gateway stop signalled");
                break;
            }
            let start = Instant::now();

            let report = match probe(&self.local, PROBE_WINDOW).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(cid = self.cid, error = %e, "local probe failed");
                    break;
                }
            };
            if !report.alive {
                debug!(cid = self.cid, "local socket closed");
                break;
            }

            if report.data_available {
                match self.local.try_read(&mut buffer) {
                    Ok(0) => break,
                    Ok(count) => {
                        let data = scrambled(buffer[..count].to_vec(), self.cid);
                        match self.tunnel.write(self.sid, self.cid, data).await {
                            Ok(response) if response.success => {
                                if !response.connected {
                                    stop = true;
                                }
                            }
                            Ok(response) => {
                                error!(cid = self.cid, message = %response.message, "tunnel write failed");
                                stop = true;
                            }
                            Err(e) => {
                                error!(cid = self.cid, error = %e, "tunnel write failed");
                                stop = true;
                            }
                        }
                        // Traffic seen: back to active mode.
                        poll = POLL_MIN;
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => {
                        error!(cid = self.cid, error = %e, "local read failed");
                        stop = true;
                    }
                }
            } else {
                poll = grow(poll);
            }

            // Poll the tunnel for remote data regardless of the write leg.
            match self.tunnel.read(self.sid, self.cid).await {
                Ok(response) if response.success => {
                    if response.connected && response.data_available {
                        let data = scrambled(response.data, self.cid);
                        if let Err(e) = self.local.write_all(&data).await {
                            error!(cid = self.cid, error = %e, "local write failed");
                            stop = true;
                        }
                        poll = POLL_MIN;
                    } else if !response.connected {
                        debug!(cid = self.cid, "remote closed");
                        stop = true;
                    }
                }
                Ok(response) => {
                    error!(cid = self.cid, message = %response.message, "tunnel read failed");
                    stop = true;
                }
                Err(e) => {
                    error!(cid = self.cid, error = %e, "tunnel read failed");
                    stop = true;
                }
            }

            elapsed = start.elapsed();
        }

        self.close().await;
    }

    /// Release the local socket and tell the tunnel to drop the connection.
    async fn close(mut self) {
        let _ = self.local.shutdown().await;
        match self.tunnel.disconnect(self.sid, self.cid).await {
            Ok(response) => info!(cid = self.cid, message = %response.message, "gateway closed"),
            Err(e) => warn!(cid = self.cid, error = %e, "disconnect failed"),
        }
    }
}

/// Next wait: the poll interval minus the last iteration's wall-clock
/// duration, floored at the minimum; zero when the iteration already
/// overran the interval (catch-up).
fn wait_time(poll: Duration, elapsed: Duration) -> Duration {
    if elapsed > poll {
        Duration::ZERO
    } else {
        (poll - elapsed).max(POLL_MIN)
    }
}

/// Grow the idle poll interval by the backoff factor, rounding to the
/// nearest millisecond, capped at the maximum.
fn grow(poll: Duration) -> Duration {
    let grown = (poll.as_millis() as f64 * POLL_GROWTH).round() as u64;
    Duration::from_millis(grown).min(POLL_MAX)
}
