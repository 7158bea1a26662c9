//! Periodic reclamation of proxies that outlived the configured lifetime.

use crate::manager::ProxyManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Scans the registry on a fixed interval and queues removal of every record
/// older than the proxy lifetime.
pub struct ExpirationSweeper {
    manager: Arc<ProxyManager>,
    interval: Duration,
}

impl ExpirationSweeper {
    pub fn new(manager: Arc<ProxyManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run sweep cycles until `shutdown_rx` flips to true.
    ///
    /// Stopping the sweeper does not wait for removals queued by earlier
    /// cycles; the manager drains those during shutdown.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            lifetime_secs = self.manager.proxy_lifetime().as_secs(),
            "Expiration sweeper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Expiration sweeper stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One scan-and-queue pass over the registry.
    ///
    /// Removals are queued fire-and-forget: the cycle never waits for a
    /// teardown to finish and puts no cap on how many run at once. A record
    /// whose teardown fails has already left the registry and is never swept
    /// again; its container leaks if the runtime stays unstable.
    pub async fn sweep_once(&self) {
        let lifetime = self.manager.proxy_lifetime();
        let mut expired = 0usize;

        for record in self.manager.registry().snapshot_all() {
            let age = record.created_at.elapsed();
            if age > lifetime {
                info!(
                    port = record.port,
                    handle = %record.handle,
                    age_secs = age.as_secs(),
                    "Proxy lifetime exceeded, queueing removal"
                );
                self.manager.queue_removal(record.port).await;
                expired += 1;
            }
        }

        if expired > 0 {
            debug!(expired, "Sweep cycle queued removals");
        }
    }
}
