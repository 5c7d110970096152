//! The tunnel service: every operation a channel can invoke.
//!
//! Operations never raise across the service boundary; internal faults are
//! converted to `{success: false, message}` responses at each operation's
//! entry point. State lives in the [`TunnelRegistry`]; this module adds the
//! authentication, relay, and admin semantics on top.

use crate::config::{UserConfig, DEFAULT_CONNECTION_TIMEOUT_HOURS, DEFAULT_SESSION_TIMEOUT_HOURS};
use crate::registry::{TunnelRegistry, UNKNOWN_HOST};
use portway_core::messages::*;
use portway_core::probe::probe;
use portway_core::{scramble, TunnelError, TunnelResult, BUFFER_SIZE};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Probe window for the service's non-blocking connection checks. The
/// client gateway probes its own socket with a wider window; here the
/// check must not stall the request cycle.
const PROBE_WINDOW: Duration = Duration::from_millis(1);

/// Server-side facade over the registry, the outbound dialer, and the
/// obfuscator.
pub struct TunnelService {
    registry: Arc<TunnelRegistry>,
    users: HashMap<String, UserConfig>,
}

impl TunnelService {
    pub fn new(registry: Arc<TunnelRegistry>, users: HashMap<String, UserConfig>) -> Self {
        Self { registry, users }
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// Transport entry point: route a decoded request to its operation.
    pub async fn dispatch(&self, request: TunnelRequest) -> TunnelResponse {
        match request {
            TunnelRequest::Login(r) => TunnelResponse::Login(self.login(r).await),
            TunnelRequest::Logout(r) => TunnelResponse::Minimal(self.logout(r).await),
            TunnelRequest::Version => TunnelResponse::Minimal(self.version().await),
            TunnelRequest::Connect(r) => TunnelResponse::Connect(self.connect(r).await),
            TunnelRequest::Disconnect(r) => TunnelResponse::Connection(self.disconnect(r).await),
            TunnelRequest::Read(r) => TunnelResponse::Read(self.read(r).await),
            TunnelRequest::Write(r) => TunnelResponse::Connection(self.write(r).await),
            TunnelRequest::Monitor(r) => TunnelResponse::Monitor(self.monitor(r).await),
            TunnelRequest::KillSession(r) => TunnelResponse::Minimal(self.kill_session(r).await),
            TunnelRequest::KillConnection(r) => {
                TunnelResponse::Connection(self.kill_connection(r).await)
            }
        }
    }

    /// Authenticate a user and open a session.
    pub async fn login(&self, request: LoginRequest) -> LoginResponse {
        // An unknown user and a disabled one take the same denial path.
        let Some(user) = self.users.get(&request.username).filter(|u| u.enabled) else {
            warn!(username = %request.username, "login rejected: user disabled or unknown");
            return LoginResponse::failure(format!("access denied for {}", request.username));
        };

        if user.password != request.password {
            warn!(username = %request.username, "login rejected: bad password");
            return LoginResponse::failure(format!("access denied for {}", request.username));
        }

        let session_timeout = match user.stimeout {
            Some(hours) => Duration::from_secs(hours * 3600),
            None => {
                warn!(
                    username = %request.username,
                    hours = DEFAULT_SESSION_TIMEOUT_HOURS,
                    "no session timeout configured, using default"
                );
                Duration::from_secs(DEFAULT_SESSION_TIMEOUT_HOURS * 3600)
            }
        };
        let connection_timeout = match user.ctimeout {
            Some(hours) => Duration::from_secs(hours * 3600),
            None => {
                warn!(
                    username = %request.username,
                    hours = DEFAULT_CONNECTION_TIMEOUT_HOURS,
                    "no connection timeout configured, using default"
                );
                Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_HOURS * 3600)
            }
        };

        let sid = self
            .registry
            .create_session(&request.username, user.admin, session_timeout, connection_timeout)
            .await;
        info!(username = %request.username, sid, "access granted");
        LoginResponse {
            success: true,
            message: format!("access granted for {}", request.username),
            sid,
        }
    }

    /// Close a session and everything it owns.
    pub async fn logout(&self, request: SessionRequest) -> MinimalResponse {
        match self.try_logout(request).await {
            Ok(username) => MinimalResponse::ok(format!("session closed for {username}")),
            Err(e) => MinimalResponse::failure(e.to_string()),
        }
    }

    async fn try_logout(&self, request: SessionRequest) -> TunnelResult<String> {
        let facts = self.registry.check_session(request.sid).await?;
        self.registry.remove_all_connections(request.sid).await?;
        self.registry.remove_session(request.sid).await?;
        info!(sid = request.sid, username = %facts.username, "logout");
        Ok(facts.username)
    }

    /// Unauthenticated server identification.
    pub async fn version(&self) -> MinimalResponse {
        MinimalResponse::ok(format!(
            "{} v{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))
    }

    /// Dial a remote endpoint and register the connection under the session.
    pub async fn connect(&self, request: ConnectRequest) -> ConnectResponse {
        if let Err(e) = self.registry.check_session(request.sid).await {
            return ConnectResponse::failure(e.to_string());
        }

        let stream = match TcpStream::connect((request.address.as_str(), request.port)).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    sid = request.sid,
                    address = %request.address,
                    port = request.port,
                    error = %e,
                    "connect failed"
                );
                return ConnectResponse::failure(format!(
                    "connection refused for {}:{}: {e}",
                    request.address, request.port
                ));
            }
        };

        let host = reverse_host(&stream).await;
        let handle = match self
            .registry
            .create_connection(request.sid, stream, &request.address, request.port, &host)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return ConnectResponse::failure(e.to_string()),
        };

        let data_available = {
            let conn = handle.io.lock().await;
            probe(&conn.stream, PROBE_WINDOW)
                .await
                .map(|r| r.data_available)
                .unwrap_or(false)
        };

        info!(
            sid = request.sid,
            cid = handle.cid,
            endpoint = %handle.endpoint(),
            host = %handle.host,
            "connection established"
        );
        ConnectResponse {
            success: true,
            message: format!("connected to {}", handle.endpoint()),
            cid: handle.cid,
            connected: true,
            data_available,
        }
    }

    /// Close one connection and remove it from its session.
    pub async fn disconnect(&self, request: ConnectionRequest) -> ConnectionResponse {
        match self.try_close(request.sid, request.cid).await {
            Ok(endpoint) => {
                info!(sid = request.sid, cid = request.cid, endpoint = %endpoint, "disconnected");
                ConnectionResponse {
                    success: true,
                    message: format!("disconnected from {endpoint}"),
                    connected: false,
                    data_available: false,
                }
            }
            Err(e) => ConnectionResponse::failure(e.to_string()),
        }
    }

    /// Shut the socket down and drop the registry entry. Shared by
    /// Disconnect and KillConnection.
    async fn try_close(&self, sid: i32, cid: i32) -> TunnelResult<String> {
        let handle = self.registry.connection(sid, cid).await?;
        {
            let mut conn = handle.io.lock().await;
            let _ = conn.stream.shutdown().await;
        }
        self.registry.remove_connection(sid, cid).await?;
        Ok(handle.endpoint())
    }

    /// Non-blocking poll of the remote socket. Success with an empty
    /// payload means "connected, nothing buffered"; a zero-length read on a
    /// readable socket is a detected disconnect.
    pub async fn read(&self, request: ConnectionRequest) -> ReadResponse {
        match self.try_read(request).await {
            Ok(response) => response,
            Err(e) => ReadResponse::failure(e.to_string()),
        }
    }

    async fn try_read(&self, request: ConnectionRequest) -> TunnelResult<ReadResponse> {
        let handle = self.registry.connection(request.sid, request.cid).await?;
        let mut conn = handle.io.lock().await;

        let report = probe(&conn.stream, PROBE_WINDOW).await?;
        if !(report.alive && report.data_available) {
            return Ok(ReadResponse {
                success: true,
                message: String::new(),
                connected: report.alive,
                data_available: false,
                data: Vec::new(),
            });
        }

        let mut buffer = vec![0u8; BUFFER_SIZE];
        match conn.stream.try_read(&mut buffer) {
            Ok(0) => Ok(ReadResponse {
                success: false,
                message: "disconnection detected".into(),
                connected: false,
                data_available: false,
                data: Vec::new(),
            }),
            Ok(count) => {
                buffer.truncate(count);
                scramble(&mut buffer, request.cid);
                conn.read_count += count as u64;
                Ok(ReadResponse {
                    success: true,
                    message: String::new(),
                    connected: true,
                    data_available: true,
                    data: buffer,
                })
            }
            // The probe raced a consumer; report an empty poll.
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadResponse {
                success: true,
                message: String::new(),
                connected: true,
                data_available: false,
                data: Vec::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Relay a payload onto the remote socket.
    pub async fn write(&self, request: WriteRequest) -> ConnectionResponse {
        match self.try_write(request).await {
            Ok(response) => response,
            Err(e) => ConnectionResponse::failure(e.to_string()),
        }
    }

    async fn try_write(&self, request: WriteRequest) -> TunnelResult<ConnectionResponse> {
        let handle = self.registry.connection(request.sid, request.cid).await?;
        let mut conn = handle.io.lock().await;

        let report = probe(&conn.stream, PROBE_WINDOW).await?;
        if !report.alive {
            return Ok(ConnectionResponse {
                success: true,
                message: String::new(),
                connected: false,
                data_available: false,
            });
        }

        let mut data = request.data;
        scramble(&mut data, request.cid);
        conn.stream.write_all(&data).await?;
        conn.write_count += data.len() as u64;

        Ok(ConnectionResponse {
            success: true,
            message: String::new(),
            connected: true,
            data_available: report.data_available,
        })
    }

    /// Admin-only: list every session and connection.
    pub async fn monitor(&self, request: SessionRequest) -> MonitorResponse {
        let facts = match self.registry.check_session(request.sid).await {
            Ok(facts) => facts,
            Err(e) => return MonitorResponse::failure(e.to_string()),
        };
        if !facts.admin {
            warn!(sid = request.sid, username = %facts.username, "monitor denied");
            return MonitorResponse::failure("admin required");
        }

        MonitorResponse {
            success: true,
            message: String::new(),
            sessions: self.registry.snapshot().await,
        }
    }

    /// Admin-only: cascade-remove a whole session.
    pub async fn kill_session(&self, request: KillSessionRequest) -> MinimalResponse {
        match self.try_kill_session(request).await {
            Ok(message) => MinimalResponse::ok(message),
            Err(e) => MinimalResponse::failure(e.to_string()),
        }
    }

    async fn try_kill_session(&self, request: KillSessionRequest) -> TunnelResult<String> {
        let target = self.registry.check_session(request.sid).await?;
        let admin = self.registry.check_session(request.admin_sid).await?;
        if !admin.admin {
            return Err(TunnelError::Permission("admin required".into()));
        }

        self.registry.remove_all_connections(request.sid).await?;
        self.registry.remove_session(request.sid).await?;
        info!(
            sid = request.sid,
            target = %target.username,
            admin = %admin.username,
            "session killed"
        );
        Ok(format!(
            "session for {} killed by {}",
            target.username, admin.username
        ))
    }

    /// Admin-only: remove one connection from any session.
    pub async fn kill_connection(&self, request: KillConnectionRequest) -> ConnectionResponse {
        match self.try_kill_connection(request).await {
            Ok(message) => ConnectionResponse {
                success: true,
                message,
                connected: false,
                data_available: false,
            },
            Err(e) => ConnectionResponse::failure(e.to_string()),
        }
    }

    async fn try_kill_connection(&self, request: KillConnectionRequest) -> TunnelResult<String> {
        let target = self.registry.check_session(request.sid).await?;
        // Validate the cid before the admin gate, like the session check.
        let handle = self.registry.connection(request.sid, request.cid).await?;
        let admin = self.registry.check_session(request.admin_sid).await?;
        if !admin.admin {
            return Err(TunnelError::Permission("admin required".into()));
        }

        let endpoint = self.try_close(request.sid, request.cid).await?;
        info!(
            sid = request.sid,
            cid = handle.cid,
            endpoint = %endpoint,
            target = %target.username,
            admin = %admin.username,
            "connection killed"
        );
        Ok(format!(
            "connection {} of {} killed by {}",
            endpoint, target.username, admin.username
        ))
    }
}

/// Best-effort reverse resolution of the connection's peer address.
async fn reverse_host(stream: &TcpStream) -> String {
    let Ok(peer) = stream.peer_addr() else {
        return UNKNOWN_HOST.to_string();
    };
    let ip: IpAddr = peer.ip();
    match tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await {
        Ok(Ok(host)) => host,
        _ => UNKNOWN_HOST.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portway_core::scramble::scrambled;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn users() -> HashMap<String, UserConfig> {
        let mut users = HashMap::new();
        users.insert(
            "root".to_string(),
            UserConfig {
                enabled: true,
                password: "rootpw".into(),
                admin: true,
                stimeout: Some(1),
                ctimeout: Some(1),
            },
        );
        users.insert(
            "plain".to_string(),
            UserConfig {
                enabled: true,
                password: "plainpw".into(),
                admin: false,
                stimeout: None,
                ctimeout: None,
            },
        );
        users.insert(
            "off".to_string(),
            UserConfig {
                enabled: false,
                password: "offpw".into(),
                admin: false,
                stimeout: None,
                ctimeout: None,
            },
        );
        users
    }

    fn service() -> TunnelService {
        TunnelService::new(Arc::new(TunnelRegistry::new()), users())
    }

    fn login_req(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Echo listener on an ephemeral port; serves a single connection.
    async fn spawn_echo() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        addr
    }

    /// Poll the service until a read returns data (the echo round trip is
    /// not instantaneous).
    async fn read_until_data(service: &TunnelService, sid: i32, cid: i32) -> ReadResponse {
        for _ in 0..50 {
            let response = service.read(ConnectionRequest { sid, cid }).await;
            if !response.success || response.data_available {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no data arrived");
    }

    #[tokio::test]
    async fn login_disabled_user_is_rejected() {
        let service = service();
        let response = service.login(login_req("off", "offpw")).await;
        assert!(!response.success);
        assert_eq!(response.sid, -1);
        assert_eq!(service.registry().count().await, 0);
    }

    #[tokio::test]
    async fn login_bad_password_is_rejected() {
        let service = service();
        let response = service.login(login_req("plain", "wrong")).await;
        assert!(!response.success);
        assert_eq!(service.registry().count().await, 0);
    }

    #[tokio::test]
    async fn login_unknown_user_is_rejected() {
        let service = service();
        let response = service.login(login_req("ghost", "x")).await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn login_success_creates_session() {
        let service = service();
        let response = service.login(login_req("plain", "plainpw")).await;
        assert!(response.success, "{}", response.message);
        assert!(response.sid >= 0);
        assert!(service.registry().check_session(response.sid).await.is_ok());
    }

    #[tokio::test]
    async fn version_is_unauthenticated() {
        let response = service().version().await;
        assert!(response.success);
        assert!(response.message.contains("portway-server"));
    }

    #[tokio::test]
    async fn connect_failure_keeps_session_valid() {
        let service = service();
        let sid = service.login(login_req("plain", "plainpw")).await.sid;

        // Grab a port with nothing listening behind it.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = dead.local_addr().unwrap();
        drop(dead);

        let response = service
            .connect(ConnectRequest {
                sid,
                address: "127.0.0.1".into(),
                port: addr.port(),
            })
            .await;
        assert!(!response.success);
        assert_eq!(response.cid, NO_CID);
        assert!(service.registry().check_session(sid).await.is_ok());
    }

    #[tokio::test]
    async fn echo_round_trip_with_scrambled_payloads() {
        let service = service();
        let sid = service.login(login_req("plain", "plainpw")).await.sid;
        let addr = spawn_echo().await;

        let connect = service
            .connect(ConnectRequest {
                sid,
                address: "127.0.0.1".into(),
                port: addr.port(),
            })
            .await;
        assert!(connect.success, "{}", connect.message);
        assert!(connect.connected);
        let cid = connect.cid;

        // The caller scrambles outbound payloads; the service restores them
        // before hitting the socket.
        let write = service
            .write(WriteRequest {
                sid,
                cid,
                data: scrambled(b"hello".to_vec(), cid),
            })
            .await;
        assert!(write.success, "{}", write.message);
        assert!(write.connected);

        let read = read_until_data(&service, sid, cid).await;
        assert!(read.success, "{}", read.message);
        assert_eq!(scrambled(read.data, cid), b"hello");

        // Counters reflect both legs.
        let monitor = service
            .monitor(SessionRequest {
                sid: service.login(login_req("root", "rootpw")).await.sid,
            })
            .await;
        let record = monitor
            .sessions
            .iter()
            .find(|s| s.username == "plain")
            .unwrap();
        assert_eq!(record.connections.len(), 1);
        assert_eq!(record.connections[0].read_count, 5);
        assert_eq!(record.connections[0].write_count, 5);
    }

    #[tokio::test]
    async fn read_with_no_data_is_an_empty_success() {
        let service = service();
        let sid = service.login(login_req("plain", "plainpw")).await.sid;
        let addr = spawn_echo().await;
        let cid = service
            .connect(ConnectRequest {
                sid,
                address: "127.0.0.1".into(),
                port: addr.port(),
            })
            .await
            .cid;

        let response = service.read(ConnectionRequest { sid, cid }).await;
        assert!(response.success);
        assert!(response.connected);
        assert!(!response.data_available);
        assert!(response.data.is_empty());
    }

    #[tokio::test]
    async fn disconnect_twice_reports_not_found() {
        let service = service();
        let sid = service.login(login_req("plain", "plainpw")).await.sid;
        let addr = spawn_echo().await;
        let cid = service
            .connect(ConnectRequest {
                sid,
                address: "127.0.0.1".into(),
                port: addr.port(),
            })
            .await
            .cid;

        let first = service.disconnect(ConnectionRequest { sid, cid }).await;
        assert!(first.success, "{}", first.message);
        assert!(!first.connected);

        let second = service.disconnect(ConnectionRequest { sid, cid }).await;
        assert!(!second.success);
    }

    #[tokio::test]
    async fn monitor_requires_admin() {
        let service = service();
        let sid = service.login(login_req("plain", "plainpw")).await.sid;
        let response = service.monitor(SessionRequest { sid }).await;
        assert!(!response.success);
        assert!(response.sessions.is_empty());
        assert!(response.message.contains("admin"));
    }

    #[tokio::test]
    async fn monitor_renders_hex_sids() {
        let service = service();
        let admin_sid = service.login(login_req("root", "rootpw")).await.sid;
        let response = service.monitor(SessionRequest { sid: admin_sid }).await;
        assert!(response.success);
        let record = &response.sessions[0];
        assert_eq!(record.sid, format!("{admin_sid:x}"));
        assert!(record.admin);
    }

    #[tokio::test]
    async fn kill_session_requires_admin_and_makes_no_change() {
        let service = service();
        let target = service.login(login_req("root", "rootpw")).await.sid;
        let caller = service.login(login_req("plain", "plainpw")).await.sid;

        let response = service
            .kill_session(KillSessionRequest {
                admin_sid: caller,
                sid: target,
            })
            .await;
        assert!(!response.success);
        assert!(service.registry().check_session(target).await.is_ok());
    }

    #[tokio::test]
    async fn kill_session_cascades() {
        let service = service();
        let admin_sid = service.login(login_req("root", "rootpw")).await.sid;
        let target = service.login(login_req("plain", "plainpw")).await.sid;
        let addr = spawn_echo().await;
        service
            .connect(ConnectRequest {
                sid: target,
                address: "127.0.0.1".into(),
                port: addr.port(),
            })
            .await;

        let response = service
            .kill_session(KillSessionRequest {
                admin_sid,
                sid: target,
            })
            .await;
        assert!(response.success, "{}", response.message);
        assert!(service.registry().check_session(target).await.is_err());
    }

    #[tokio::test]
    async fn kill_connection_requires_admin() {
        let service = service();
        let target = service.login(login_req("root", "rootpw")).await.sid;
        let caller = service.login(login_req("plain", "plainpw")).await.sid;
        let addr = spawn_echo().await;
        let cid = service
            .connect(ConnectRequest {
                sid: target,
                address: "127.0.0.1".into(),
                port: addr.port(),
            })
            .await
            .cid;

        let denied = service
            .kill_connection(KillConnectionRequest {
                admin_sid: caller,
                sid: target,
                cid,
            })
            .await;
        assert!(!denied.success);
        assert!(service.registry().connection(target, cid).await.is_ok());

        let allowed = service
            .kill_connection(KillConnectionRequest {
                admin_sid: target,
                sid: target,
                cid,
            })
            .await;
        assert!(allowed.success, "{}", allowed.message);
        assert!(service.registry().connection(target, cid).await.is_err());
    }
}
