//! Server composition root.
//!
//! Owns the registry, the tunnel service, and the shutdown signal, and
//! wires the sweeper and the configured transport listener together with
//! deterministic startup/shutdown ordering.

use crate::config::ServerConfig;
use crate::registry::TunnelRegistry;
use crate::service::TunnelService;
use crate::{sweeper, transport};
use portway_core::TunnelResult;
use std::sync::Arc;
use tokio::sync::watch;

/// The portway server instance.
pub struct TunnelServer {
    config: ServerConfig,
    registry: Arc<TunnelRegistry>,
    service: Arc<TunnelService>,
    shutdown_tx: watch::Sender<bool>,
}

impl TunnelServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(TunnelRegistry::new());
        let service = Arc::new(TunnelService::new(registry.clone(), config.users.clone()));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            registry,
            service,
            shutdown_tx,
        }
    }

    pub fn service(&self) -> Arc<TunnelService> {
        self.service.clone()
    }

    /// Spawn the sweeper, then serve the configured transport until the
    /// shutdown signal fires. The sweeper is always stopped before this
    /// returns, even when the listener fails.
    pub async fn run(&self) -> TunnelResult<()> {
        let sweeper = tokio::spawn(sweeper::run(
            self.registry.clone(),
            sweeper::SWEEP_INTERVAL,
            self.shutdown_tx.subscribe(),
        ));

        let result = transport::serve(
            self.config.listener.clone(),
            self.service.clone(),
            self.shutdown_tx.subscribe(),
        )
        .await;

        let _ = self.shutdown_tx.send(true);
        let _ = sweeper.await;
        result
    }

    /// Signal every component to stop. One-shot.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
