//! Idle-timeout sweeper.
//!
//! A background task that periodically runs the registry's eviction pass.
//! Spawned by the server bootstrap, never by a constructor, so startup and
//! shutdown ordering stay deterministic.

use crate::registry::TunnelRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

/// Interval between eviction passes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run eviction passes every `interval` until the shutdown signal fires.
/// The signal is one-shot: once observed, no further passes run and the
/// task terminates.
pub async fn run(
    registry: Arc<TunnelRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    info!(interval_secs = interval.as_secs(), "sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let (sessions, connections) = registry.sweep().await;
                if !sessions.is_empty() || connections > 0 {
                    debug!(sessions = sessions.len(), connections, "sweep pass complete");
                }
            }
        }
    }

    info!("sweeper stopped");
}
