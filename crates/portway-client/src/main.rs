//! portway-client: tunnel client binary.
//!
//! `run` forwards local ports through the tunnel (one gateway per accepted
//! socket); the remaining subcommands expose the unauthenticated version
//! call and the admin surface.

use anyhow::Context;
use clap::{Parser, Subcommand};
use portway_client::client::TunnelClient;
use portway_client::config::{ClientConfig, Forward};
use portway_client::gateway::Gateway;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// portway-client — TCP tunnel client
#[derive(Parser, Debug)]
#[command(name = "portway-client", version, about = "TCP tunnel client")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "portway-client.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forward local ports through the tunnel (default)
    Run,
    /// Print the server identification string
    Version,
    /// List sessions and connections (admin)
    Monitor,
    /// Terminate a session (admin)
    KillSession {
        /// Target session id, hex as shown by monitor
        sid: String,
    },
    /// Terminate a connection (admin)
    KillConnection {
        /// Owning session id, hex as shown by monitor
        sid: String,
        /// Target connection id, hex as shown by monitor
        cid: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "client error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ClientConfig::load(&cli.config)?;
    let client = Arc::new(TunnelClient::open(&config.tunnel.channel).await?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => forward(client, &config).await,
        Command::Version => {
            let response = client.version().await?;
            println!("{}", response.message);
            Ok(())
        }
        Command::Monitor => {
            let sid = login(&client, &config).await?;
            let response = client.monitor(sid).await?;
            if response.success {
                for session in &response.sessions {
                    println!(
                        "session {}  user={} admin={} logon={} last_access={}",
                        session.sid,
                        session.username,
                        session.admin,
                        session.logon,
                        session.last_access
                    );
                    for conn in &session.connections {
                        println!(
                            "  connection {}  {}:{} host={} read={} write={}",
                            conn.cid, conn.address, conn.port, conn.host, conn.read_count,
                            conn.write_count
                        );
                    }
                }
            } else {
                println!("{}", response.message);
            }
            let _ = client.logout(sid).await;
            Ok(())
        }
        Command::KillSession { sid: target } => {
            let sid = login(&client, &config).await?;
            let response = client.kill_session(sid, parse_hex_id(&target)?).await?;
            println!("{}", response.message);
            let _ = client.logout(sid).await;
            Ok(())
        }
        Command::KillConnection { sid: target, cid } => {
            let sid = login(&client, &config).await?;
            let response = client
                .kill_connection(sid, parse_hex_id(&target)?, parse_hex_id(&cid)?)
                .await?;
            println!("{}", response.message);
            let _ = client.logout(sid).await;
            Ok(())
        }
    }
}

/// Authenticate with the configured credentials.
async fn login(client: &TunnelClient, config: &ClientConfig) -> anyhow::Result<i32> {
    let response = client
        .login(&config.tunnel.username, &config.tunnel.password)
        .await?;
    anyhow::ensure!(response.success, "{}", response.message);
    Ok(response.sid)
}

/// Parse a monitor-style hex id.
fn parse_hex_id(text: &str) -> anyhow::Result<i32> {
    i32::from_str_radix(text, 16).with_context(|| format!("invalid hex id: {text}"))
}

/// Login once, then serve every forward rule until the shutdown signal.
async fn forward(client: Arc<TunnelClient>, config: &ClientConfig) -> anyhow::Result<()> {
    anyhow::ensure!(
        !config.forwards.is_empty(),
        "no [[forward]] rules configured"
    );

    let sid = login(&client, config).await?;
    info!(sid, username = %config.tunnel.username, "logged in");

    let (shutdown_tx, _) = watch::channel(false);
    let mut accept_tasks = Vec::new();
    for rule in &config.forwards {
        let listener = TcpListener::bind((rule.bind.as_str(), rule.local_port))
            .await
            .with_context(|| format!("cannot bind {}:{}", rule.bind, rule.local_port))?;
        info!(
            local = %listener.local_addr()?,
            address = %rule.address,
            port = rule.port,
            "forward listening"
        );
        accept_tasks.push(tokio::spawn(accept_loop(
            listener,
            client.clone(),
            sid,
            rule.clone(),
            shutdown_tx.subscribe(),
        )));
    }

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    let _ = shutdown_tx.send(true);
    for task in accept_tasks {
        let _ = task.await;
    }

    let response = client.logout(sid).await?;
    info!(message = %response.message, "logged out");
    Ok(())
}

/// Accept local sockets and spawn one gateway per connection. On shutdown,
/// waits for every gateway to disconnect before returning.
async fn accept_loop(
    listener: TcpListener,
    client: Arc<TunnelClient>,
    sid: i32,
    rule: Forward,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut gateways = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((local, peer)) => {
                        info!(%peer, address = %rule.address, port = rule.port, "local connection accepted");
                        let client = client.clone();
                        let address = rule.address.clone();
                        let port = rule.port;
                        let gateway_shutdown = shutdown.clone();
                        gateways.push(tokio::spawn(async move {
                            match Gateway::open(client, sid, local, &address, port).await {
                                Ok(gateway) => gateway.run(gateway_shutdown).await,
                                Err(e) => warn!(error = %e, "gateway rejected"),
                            }
                        }));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
        gateways.retain(|gateway| !gateway.is_finished());
    }

    for gateway in gateways {
        let _ = gateway.await;
    }
}
