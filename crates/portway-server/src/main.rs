//! portway-server: tunnel server binary.
//!
//! Authenticates users, owns sessions and their outbound connections,
//! relays bytes between tunnel channels and remote endpoints, and evicts
//! idle state in the background.

use clap::Parser;
use portway_server::config::ServerConfig;
use portway_server::server::TunnelServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};

/// portway-server — TCP tunnel server
#[derive(Parser, Debug)]
#[command(name = "portway-server", version, about = "TCP tunnel server")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "portway-server.toml")]
    config: PathBuf,

    /// Listen address override (WebSocket transports)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
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

    info!(version = env!("CARGO_PKG_VERSION"), "starting portway-server");

    let config = match ServerConfig::load(&cli.config, cli.bind) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = TunnelServer::new(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            server.shutdown();
        }
    }

    info!("portway-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
