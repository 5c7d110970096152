//! Typed RPC stub over the tunnel contract.
//!
//! Wraps a transport channel behind a mutex so every caller issues one
//! request and waits for its response before the next goes out. Shared by
//! all gateways driving the same tunnel session.

use crate::transport::{AnyChannel, ChannelConfig};
use portway_core::messages::*;
use portway_core::{TunnelError, TunnelRequest, TunnelResponse, TunnelResult};
use tokio::sync::Mutex;

pub struct TunnelClient {
    channel: Mutex<AnyChannel>,
}

impl TunnelClient {
    pub fn new(channel: AnyChannel) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }

    /// Open the configured channel and wrap it.
    pub async fn open(config: &ChannelConfig) -> TunnelResult<Self> {
        Ok(Self::new(AnyChannel::connect(config).await?))
    }

    async fn call(&self, request: TunnelRequest) -> TunnelResult<TunnelResponse> {
        let mut channel = self.channel.lock().await;
        channel.call(request).await
    }

    pub async fn login(&self, username: &str, password: &str) -> TunnelResult<LoginResponse> {
        match self
            .call(TunnelRequest::Login(LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            }))
            .await?
        {
            TunnelResponse::Login(response) => Ok(response),
            other => Err(unexpected("login", &other)),
        }
    }

    pub async fn logout(&self, sid: i32) -> TunnelResult<MinimalResponse> {
        match self.call(TunnelRequest::Logout(SessionRequest { sid })).await? {
            TunnelResponse::Minimal(response) => Ok(response),
            other => Err(unexpected("logout", &other)),
        }
    }

    pub async fn version(&self) -> TunnelResult<MinimalResponse> {
        match self.call(TunnelRequest::Version).await? {
            TunnelResponse::Minimal(response) => Ok(response),
            other => Err(unexpected("version", &other)),
        }
    }

    pub async fn connect(
        &self,
        sid: i32,
        address: &str,
        port: u16,
    ) -> TunnelResult<ConnectResponse> {
        match self
            .call(TunnelRequest::Connect(ConnectRequest {
                sid,
                address: address.to_string(),
                port,
            }))
            .await?
        {
            TunnelResponse::Connect(response) => Ok(response),
            other => Err(unexpected("connect", &other)),
        }
    }

    pub async fn disconnect(&self, sid: i32, cid: i32) -> TunnelResult<ConnectionResponse> {
        match self
            .call(TunnelRequest::Disconnect(ConnectionRequest { sid, cid }))
            .await?
        {
            TunnelResponse::Connection(response) => Ok(response),
            other => Err(unexpected("disconnect", &other)),
        }
    }

    pub async fn read(&self, sid: i32, cid: i32) -> TunnelResult<ReadResponse> {
        match self
            .call(TunnelRequest::Read(ConnectionRequest { sid, cid }))
            .await?
        {
            TunnelResponse::Read(response) => Ok(response),
            other => Err(unexpected("read", &other)),
        }
    }

    pub async fn write(&self, sid: i32, cid: i32, data: Vec<u8>) -> TunnelResult<ConnectionResponse> {
        match self
            .call(TunnelRequest::Write(WriteRequest { sid, cid, data }))
            .await?
        {
            TunnelResponse::Connection(response) => Ok(response),
            other => Err(unexpected("write", &other)),
        }
    }

    pub async fn monitor(&self, sid: i32) -> TunnelResult<MonitorResponse> {
        match self.call(TunnelRequest::Monitor(SessionRequest { sid })).await? {
            TunnelResponse::Monitor(response) => Ok(response),
            other => Err(unexpected("monitor", &other)),
        }
    }

    pub async fn kill_session(&self, admin_sid: i32, sid: i32) -> TunnelResult<MinimalResponse> {
        match self
            .call(TunnelRequest::KillSession(KillSessionRequest { admin_sid, sid }))
            .await?
        {
            TunnelResponse::Minimal(response) => Ok(response),
            other => Err(unexpected("kill-session", &other)),
        }
    }

    pub async fn kill_connection(
        &self,
        admin_sid: i32,
        sid: i32,
        cid: i32,
    ) -> TunnelResult<ConnectionResponse> {
        match self
            .call(TunnelRequest::KillConnection(KillConnectionRequest {
                admin_sid,
                sid,
                cid,
            }))
            .await?
        {
            TunnelResponse::Connection(response) => Ok(response),
            other => Err(unexpected("kill-connection", &other)),
        }
    }
}

fn unexpected(op: &str, response: &TunnelResponse) -> TunnelError {
    TunnelError::Transport(format!(
        "unexpected {} response to {op} request",
        response.op()
    ))
}
