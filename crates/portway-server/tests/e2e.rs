//! End-to-end flows through real transport channels.
//!
//! Spins up the service behind a listener on an ephemeral port, connects a
//! client channel, and drives a gateway-wrapped local socket against an
//! echo listener.

use portway_client::client::TunnelClient;
use portway_client::gateway::Gateway;
use portway_client::transport::ChannelConfig;
use portway_core::WireFormat;
use portway_server::config::UserConfig;
use portway_server::registry::TunnelRegistry;
use portway_server::service::TunnelService;
use portway_server::transport::ws;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

fn users() -> HashMap<String, UserConfig> {
    let mut users = HashMap::new();
    users.insert(
        "tester".to_string(),
        UserConfig {
            enabled: true,
            password: "secret".into(),
            admin: true,
            stimeout: Some(1),
            ctimeout: Some(1),
        },
    );
    users
}

/// Serve the tunnel over a WebSocket listener on an ephemeral port.
async fn start_server(format: WireFormat) -> (SocketAddr, watch::Sender<bool>) {
    let registry = Arc::new(TunnelRegistry::new());
    let service = Arc::new(TunnelService::new(registry, users()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        ws::serve(listener, format, service, shutdown_rx).await.unwrap();
    });
    (addr, shutdown_tx)
}

/// Echo listener serving a single connection.
async fn spawn_echo() -> SocketAddr {
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

#[tokio::test]
async fn gateway_echo_round_trip_over_ws_binary() {
    let (server, _server_shutdown) = start_server(WireFormat::Binary).await;
    let echo = spawn_echo().await;

    let channel = ChannelConfig::WsBinary {
        url: format!("ws://{server}"),
    };
    let client = Arc::new(TunnelClient::open(&channel).await.unwrap());
    let login = client.login("tester", "secret").await.unwrap();
    assert!(login.success, "{}", login.message);

    // A local listener plays the forwarded port; the test drives the
    // application side of the socket.
    let local = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = local.local_addr().unwrap();
    let mut app = TcpStream::connect(local_addr).await.unwrap();
    let (gateway_side, _) = local.accept().await.unwrap();

    let gateway = Gateway::open(
        client.clone(),
        login.sid,
        gateway_side,
        "127.0.0.1",
        echo.port(),
    )
    .await
    .unwrap();
    let (gateway_shutdown, gateway_shutdown_rx) = watch::channel(false);
    let gateway_task = tokio::spawn(gateway.run(gateway_shutdown_rx));

    app.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(5), app.read_exact(&mut buf))
        .await
        .expect("echo reply did not arrive")
        .unwrap();
    assert_eq!(&buf, b"hello");

    gateway_shutdown.send(true).unwrap();
    gateway_task.await.unwrap();

    // The gateway disconnected on stop, so no connections remain.
    let monitor = client.monitor(login.sid).await.unwrap();
    assert!(monitor.success, "{}", monitor.message);
    let record = monitor
        .sessions
        .iter()
        .find(|s| s.username == "tester")
        .unwrap();
    assert!(record.connections.is_empty());

    let logout = client.logout(login.sid).await.unwrap();
    assert!(logout.success, "{}", logout.message);
}

#[tokio::test]
async fn login_and_version_over_ws_text() {
    let (server, _server_shutdown) = start_server(WireFormat::Text).await;

    let channel = ChannelConfig::WsText {
        url: format!("ws://{server}"),
    };
    let client = TunnelClient::open(&channel).await.unwrap();

    let version = client.version().await.unwrap();
    assert!(version.success);
    assert!(version.message.contains("portway-server"));

    let rejected = client.login("tester", "wrong").await.unwrap();
    assert!(!rejected.success);

    let login = client.login("tester", "secret").await.unwrap();
    assert!(login.success, "{}", login.message);
    let logout = client.logout(login.sid).await.unwrap();
    assert!(logout.success);
}

#[cfg(unix)]
#[tokio::test]
async fn session_lifecycle_over_ipc() {
    use portway_server::transport::ipc;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portway.sock");

    let registry = Arc::new(TunnelRegistry::new());
    let service = Arc::new(TunnelService::new(registry, users()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let path = path.clone();
        tokio::spawn(async move {
            ipc::serve(&path, service, shutdown_rx).await.unwrap();
        });
    }
    // Give the listener a moment to bind the socket file.
    for _ in 0..50 {
        if path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let channel = ChannelConfig::Ipc { path: path.clone() };
    let client = TunnelClient::open(&channel).await.unwrap();
    let login = client.login("tester", "secret").await.unwrap();
    assert!(login.success, "{}", login.message);

    let monitor = client.monitor(login.sid).await.unwrap();
    assert!(monitor.success);
    assert_eq!(monitor.sessions.len(), 1);
    assert_eq!(monitor.sessions[0].sid, format!("{:x}", login.sid));

    let logout = client.logout(login.sid).await.unwrap();
    assert!(logout.success);

    let _ = shutdown_tx.send(true);
}
