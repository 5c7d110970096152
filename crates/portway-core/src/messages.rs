//! Wire messages for the tunnel request/response contract.
//!
//! Every operation is a single request/response pair. Responses always carry
//! a `success` flag plus a human-readable `message`; the service never
//! raises across this boundary.

use serde::{Deserialize, Serialize};

/// Sentinel connection id returned when a Connect attempt fails.
pub const NO_CID: i32 = -1;

// ── Requests ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Session-scoped request (Logout, Monitor).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub sid: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub sid: i32,
    pub address: String,
    pub port: u16,
}

/// Connection-scoped request (Disconnect, Read).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub sid: i32,
    pub cid: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub sid: i32,
    pub cid: i32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KillSessionRequest {
    pub admin_sid: i32,
    pub sid: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KillConnectionRequest {
    pub admin_sid: i32,
    pub sid: i32,
    pub cid: i32,
}

// ── Responses ────────────────────────────────────────────────────────

/// Bare success/message response (Logout, Version, KillSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimalResponse {
    pub success: bool,
    pub message: String,
}

impl MinimalResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub sid: i32,
}

impl LoginResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), sid: -1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub success: bool,
    pub message: String,
    pub cid: i32,
    pub connected: bool,
    pub data_available: bool,
}

impl ConnectResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            cid: NO_CID,
            connected: false,
            data_available: false,
        }
    }
}

/// Connection-state response (Disconnect, Write, KillConnection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub success: bool,
    pub message: String,
    pub connected: bool,
    pub data_available: bool,
}

impl ConnectionResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            connected: false,
            data_available: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub success: bool,
    pub message: String,
    pub connected: bool,
    pub data_available: bool,
    pub data: Vec<u8>,
}

impl ReadResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            connected: false,
            data_available: false,
            data: Vec::new(),
        }
    }
}

/// One session as reported by Monitor. The sid is rendered in hex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sid: String,
    pub username: String,
    pub admin: bool,
    /// Logon time, seconds since the Unix epoch.
    pub logon: u64,
    /// Last access time, seconds since the Unix epoch.
    pub last_access: u64,
    pub connections: Vec<ConnectionRecord>,
}

/// One connection as reported by Monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub cid: String,
    pub address: String,
    pub port: u16,
    /// Best-effort reverse-resolved host, `"?"` when unresolved.
    pub host: String,
    pub read_count: u64,
    pub write_count: u64,
    /// Last access time, seconds since the Unix epoch.
    pub last_access: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResponse {
    pub success: bool,
    pub message: String,
    pub sessions: Vec<SessionRecord>,
}

impl MonitorResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), sessions: Vec::new() }
    }
}

// ── Envelopes ────────────────────────────────────────────────────────

/// Every request a transport channel can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "kebab-case")]
pub enum TunnelRequest {
    Login(LoginRequest),
    Logout(SessionRequest),
    Version,
    Connect(ConnectRequest),
    Disconnect(ConnectionRequest),
    Read(ConnectionRequest),
    Write(WriteRequest),
    Monitor(SessionRequest),
    KillSession(KillSessionRequest),
    KillConnection(KillConnectionRequest),
}

impl TunnelRequest {
    /// Operation name for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Logout(_) => "logout",
            Self::Version => "version",
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
            Self::Read(_) => "read",
            Self::Write(_) => "write",
            Self::Monitor(_) => "monitor",
            Self::KillSession(_) => "kill-session",
            Self::KillConnection(_) => "kill-connection",
        }
    }
}

/// Every response a transport channel can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "kebab-case")]
pub enum TunnelResponse {
    Minimal(MinimalResponse),
    Login(LoginResponse),
    Connect(ConnectResponse),
    Connection(ConnectionResponse),
    Read(ReadResponse),
    Monitor(MonitorResponse),
}

impl TunnelResponse {
    /// Response kind for logs and mismatch errors.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Minimal(_) => "minimal",
            Self::Login(_) => "login",
            Self::Connect(_) => "connect",
            Self::Connection(_) => "connection",
            Self::Read(_) => "read",
            Self::Monitor(_) => "monitor",
        }
    }
}
