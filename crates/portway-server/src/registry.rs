//! Session and connection registry.
//!
//! Tracks all active sessions and the connections they own, handles id
//! generation, cascading removal, and idle-timeout sweeping. All mutations
//! go through the registry's `RwLock`; connection socket IO happens outside
//! it, behind each connection's own mutex.

use portway_core::messages::{ConnectionRecord, SessionRecord};
use portway_core::{TunnelError, TunnelResult};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Placeholder host when reverse resolution fails.
pub const UNKNOWN_HOST: &str = "?";

/// Mutable IO state of one outbound connection.
///
/// Driven only by the single gateway that owns the cid, so the mutex is
/// uncontended in the data path; it exists so the registry lock does not
/// have to be held across socket IO.
#[derive(Debug)]
pub struct ConnectionIo {
    pub stream: TcpStream,
    pub read_count: u64,
    pub write_count: u64,
}

/// One connection owned by a session.
struct ConnectionEntry {
    address: String,
    port: u16,
    host: String,
    last_access: Instant,
    io: Arc<Mutex<ConnectionIo>>,
}

/// Connection metadata plus a handle to its IO state, as returned by
/// lookups. Cloning is cheap; the socket itself is never cloned.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub cid: i32,
    pub address: String,
    pub port: u16,
    pub host: String,
    pub io: Arc<Mutex<ConnectionIo>>,
}

impl ConnectionHandle {
    /// Remote endpoint as `address:port`, for log and response messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// One authenticated session.
struct Session {
    username: String,
    admin: bool,
    logon_at: SystemTime,
    last_access: Instant,
    session_timeout: Duration,
    connection_timeout: Duration,
    connections: HashMap<i32, ConnectionEntry>,
}

/// Per-session facts the service operations need after a session check.
#[derive(Debug, Clone)]
pub struct SessionFacts {
    pub username: String,
    pub admin: bool,
}

/// Registry of all active sessions and their connections.
pub struct TunnelRegistry {
    sessions: RwLock<HashMap<i32, Session>>,
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session and return its sid.
    pub async fn create_session(
        &self,
        username: &str,
        admin: bool,
        session_timeout: Duration,
        connection_timeout: Duration,
    ) -> i32 {
        let mut sessions = self.sessions.write().await;
        let sid = unused_id(&sessions);
        sessions.insert(
            sid,
            Session {
                username: username.to_string(),
                admin,
                logon_at: SystemTime::now(),
                last_access: Instant::now(),
                session_timeout,
                connection_timeout,
                connections: HashMap::new(),
            },
        );
        info!(sid, username, admin, "session created");
        sid
    }

    /// Validate a sid, refresh its last-access timestamp, and return the
    /// session facts. Unknown sids fail with an auth error.
    pub async fn check_session(&self, sid: i32) -> TunnelResult<SessionFacts> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&sid)
            .ok_or_else(|| TunnelError::Auth(format!("{sid:x}")))?;
        session.last_access = Instant::now();
        Ok(SessionFacts {
            username: session.username.clone(),
            admin: session.admin,
        })
    }

    /// Remove a session and everything it owns. Returns the number of
    /// connections dropped with it.
    pub async fn remove_session(&self, sid: i32) -> TunnelResult<usize> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .remove(&sid)
            .ok_or_else(|| TunnelError::Auth(format!("{sid:x}")))?;
        let dropped = session.connections.len();
        info!(sid, username = %session.username, dropped, "session removed");
        Ok(dropped)
    }

    /// Register an established outbound socket under the session and return
    /// a handle carrying the new cid.
    pub async fn create_connection(
        &self,
        sid: i32,
        stream: TcpStream,
        address: &str,
        port: u16,
        host: &str,
    ) -> TunnelResult<ConnectionHandle> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&sid)
            .ok_or_else(|| TunnelError::Auth(format!("{sid:x}")))?;
        session.last_access = Instant::now();

        let cid = unused_id(&session.connections);
        let io = Arc::new(Mutex::new(ConnectionIo {
            stream,
            read_count: 0,
            write_count: 0,
        }));
        session.connections.insert(
            cid,
            ConnectionEntry {
                address: address.to_string(),
                port,
                host: host.to_string(),
                last_access: Instant::now(),
                io: io.clone(),
            },
        );
        debug!(sid, cid, address, port, "connection registered");

        Ok(ConnectionHandle {
            cid,
            address: address.to_string(),
            port,
            host: host.to_string(),
            io,
        })
    }

    /// Validate a (sid, cid) pair, refresh both last-access timestamps, and
    /// return a handle to the connection.
    pub async fn connection(&self, sid: i32, cid: i32) -> TunnelResult<ConnectionHandle> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&sid)
            .ok_or_else(|| TunnelError::Auth(format!("{sid:x}")))?;
        session.last_access = Instant::now();
        let entry = session
            .connections
            .get_mut(&cid)
            .ok_or_else(|| TunnelError::NotFound(format!("{cid:x}")))?;
        entry.last_access = Instant::now();
        Ok(ConnectionHandle {
            cid,
            address: entry.address.clone(),
            port: entry.port,
            host: entry.host.clone(),
            io: entry.io.clone(),
        })
    }

    /// Remove one connection. A second removal of the same cid reports
    /// not-found rather than faulting.
    pub async fn remove_connection(&self, sid: i32, cid: i32) -> TunnelResult<ConnectionHandle> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&sid)
            .ok_or_else(|| TunnelError::Auth(format!("{sid:x}")))?;
        session.last_access = Instant::now();
        let entry = session
            .connections
            .remove(&cid)
            .ok_or_else(|| TunnelError::NotFound(format!("{cid:x}")))?;
        debug!(sid, cid, "connection removed");
        Ok(ConnectionHandle {
            cid,
            address: entry.address,
            port: entry.port,
            host: entry.host,
            io: entry.io,
        })
    }

    /// Drop every connection owned by a session (the session survives).
    pub async fn remove_all_connections(&self, sid: i32) -> TunnelResult<usize> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&sid)
            .ok_or_else(|| TunnelError::Auth(format!("{sid:x}")))?;
        let dropped = session.connections.len();
        session.connections.clear();
        if dropped > 0 {
            debug!(sid, dropped, "connections cleared");
        }
        Ok(dropped)
    }

    /// Snapshot of every session for the monitor operation. Sids and cids
    /// are rendered in hex.
    pub async fn snapshot(&self) -> Vec<SessionRecord> {
        let sessions = self.sessions.read().await;
        let mut records = Vec::with_capacity(sessions.len());

        for (sid, session) in sessions.iter() {
            let mut connections = Vec::with_capacity(session.connections.len());
            for (cid, entry) in &session.connections {
                let io = entry.io.lock().await;
                connections.push(ConnectionRecord {
                    cid: format!("{cid:x}"),
                    address: entry.address.clone(),
                    port: entry.port,
                    host: entry.host.clone(),
                    read_count: io.read_count,
                    write_count: io.write_count,
                    last_access: wall_clock(entry.last_access),
                });
            }
            records.push(SessionRecord {
                sid: format!("{sid:x}"),
                username: session.username.clone(),
                admin: session.admin,
                logon: epoch_secs(session.logon_at),
                last_access: wall_clock(session.last_access),
                connections,
            });
        }

        records
    }

    /// Evict idle state. A session idle past its session timeout is removed
    /// whole; otherwise its connections idle past the connection timeout are
    /// removed individually. Returns `(removed sessions, removed connections)`.
    pub async fn sweep(&self) -> (Vec<i32>, usize) {
        let mut sessions = self.sessions.write().await;
        let mut removed_sessions = Vec::new();
        let mut removed_connections = 0usize;

        sessions.retain(|sid, session| {
            let idle = session.last_access.elapsed();
            if idle > session.session_timeout {
                warn!(
                    sid = *sid,
                    username = %session.username,
                    idle_secs = idle.as_secs(),
                    "session expired"
                );
                removed_connections += session.connections.len();
                removed_sessions.push(*sid);
                return false;
            }

            let timeout = session.connection_timeout;
            session.connections.retain(|cid, entry| {
                let idle = entry.last_access.elapsed();
                if idle > timeout {
                    warn!(
                        sid = *sid,
                        cid = *cid,
                        idle_secs = idle.as_secs(),
                        "connection expired"
                    );
                    removed_connections += 1;
                    false
                } else {
                    true
                }
            });
            true
        });

        if !removed_sessions.is_empty() || removed_connections > 0 {
            debug!(
                sessions = removed_sessions.len(),
                connections = removed_connections,
                "sweep evicted idle state"
            );
        }

        (removed_sessions, removed_connections)
    }

    /// Number of active sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Draw a random non-negative id, probing upward past collisions.
fn unused_id<V>(map: &HashMap<i32, V>) -> i32 {
    let mut key: i32 = rand::thread_rng().gen_range(0..i32::MAX);
    while map.contains_key(&key) {
        key = key.checked_add(1).unwrap_or(0);
    }
    key
}

/// Project a monotonic timestamp back onto the wall clock, as epoch seconds.
fn wall_clock(at: Instant) -> u64 {
    epoch_secs(SystemTime::now() - at.elapsed())
}

fn epoch_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
