//! Orchestrates port allocation, container provisioning, registration, and
//! teardown.

use crate::allocator::PortAllocator;
use crate::backend::Backend;
use crate::config::ProxyConfig;
use crate::error::ProvisionError;
use crate::registry::{ProxyRecord, ProxyRegistry};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Publicly reachable endpoint of a freshly created proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Address clients connect to, from the resolved configuration.
    pub address: String,
    /// Allocated listen port.
    pub port: u32,
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Manages the lifecycle of every proxy container.
///
/// `ProxyManager` is designed to be used behind an `Arc` for shared ownership
/// across async tasks; the [`new`](ProxyManager::new) constructor returns
/// `Arc<Self>` directly to enforce this pattern. It owns the port allocator,
/// the registry, and the set of in-flight background removals queued by the
/// expiration sweeper. There is no other shared state; nothing here is
/// process-global.
pub struct ProxyManager {
    allocator: PortAllocator,
    registry: ProxyRegistry,
    backend: Arc<dyn Backend>,
    public_address: String,
    upstream_host: String,
    upstream_port: u16,
    proxy_lifetime: Duration,
    /// Removals queued fire-and-forget by the sweeper. Drained on shutdown so
    /// no teardown operation leaks past process exit.
    removals: Mutex<JoinSet<()>>,
}

impl ProxyManager {
    /// Create a new manager from the resolved proxy configuration.
    pub fn new(config: &ProxyConfig, backend: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self {
            allocator: PortAllocator::new(config.base_port),
            registry: ProxyRegistry::new(),
            backend,
            public_address: config.public_address.clone(),
            upstream_host: config.upstream_host.clone(),
            upstream_port: config.upstream_port,
            proxy_lifetime: config.lifetime(),
            removals: Mutex::new(JoinSet::new()),
        })
    }

    /// Provision a new forwarding container and return its public endpoint.
    ///
    /// Allocates a fresh port, asks the backend to create and start a
    /// forwarder relaying to the fixed upstream, and registers the result.
    /// On any failure no record is inserted; the allocated port is simply
    /// abandoned and the caller may retry.
    pub async fn create_proxy(&self) -> Result<ProxyEndpoint, ProvisionError> {
        let port = self.allocator.next();
        let name = format!("socat-proxy-{}", port);
        info!(port, name, "Creating proxy");

        let handle = self
            .backend
            .provision(port, &self.upstream_host, self.upstream_port, &name)
            .await
            .map_err(|source| {
                warn!(port, error = %source, "Provisioning failed");
                ProvisionError::Backend { port, source }
            })?;

        self.registry.insert(ProxyRecord {
            port,
            handle: handle.clone(),
            created_at: Instant::now(),
        });

        let endpoint = ProxyEndpoint {
            address: self.public_address.clone(),
            port,
        };
        info!(port, handle = %handle, endpoint = %endpoint, "Proxy created");
        Ok(endpoint)
    }

    /// Remove the proxy on `port`, tearing down its container.
    ///
    /// Returns `true` only when a record existed and both backend teardown
    /// calls succeeded. `false` covers two cases callers cannot tell apart:
    /// no proxy was registered on `port`, or one was found but its teardown
    /// failed. In the failure case the registry entry is already gone, the
    /// container may be orphaned, and the failure is logged but never
    /// retried.
    pub async fn remove_proxy(&self, port: u32) -> bool {
        // Winning this removal is what grants the exclusive right to tear
        // down the handle; a racing remover for the same port sees None.
        let Some(record) = self.registry.remove_if_present(port) else {
            debug!(port, "No proxy registered on port");
            return false;
        };

        info!(port, handle = %record.handle, "Removing proxy");
        if let Err(e) = self.backend.stop(&record.handle).await {
            warn!(port, handle = %record.handle, error = %e, "Failed to stop container");
            return false;
        }
        if let Err(e) = self.backend.remove(&record.handle).await {
            warn!(port, handle = %record.handle, error = %e, "Failed to remove container");
            return false;
        }

        info!(port, handle = %record.handle, "Proxy removed");
        true
    }

    /// Queue a background removal without waiting for it to finish.
    ///
    /// Used by the expiration sweeper; queued work is joined by
    /// [`shutdown`](ProxyManager::shutdown) before the final drain.
    pub async fn queue_removal(self: &Arc<Self>, port: u32) {
        let mut removals = self.removals.lock().await;
        // Reap already-finished removals so the set does not grow without
        // bound between shutdowns.
        while removals.try_join_next().is_some() {}

        let manager = Arc::clone(self);
        removals.spawn(async move {
            manager.remove_proxy(port).await;
        });
    }

    /// Wait for every queued background removal to finish.
    pub async fn drain_removals(&self) {
        let mut removals = self.removals.lock().await;
        while removals.join_next().await.is_some() {}
    }

    /// Tear everything down.
    ///
    /// The sweeper must already be stopped when this is called. Queued
    /// background removals are drained first, then every remaining proxy is
    /// removed synchronously, logging individual failures. The registry is
    /// empty when this returns.
    pub async fn shutdown(&self) {
        info!(active = self.registry.len(), "Shutting down proxy manager");

        self.drain_removals().await;

        for record in self.registry.snapshot_all() {
            if !self.remove_proxy(record.port).await {
                warn!(
                    port = record.port,
                    "Proxy not removed cleanly during shutdown (already gone or teardown failed)"
                );
            }
        }

        info!("Proxy manager shutdown complete");
    }

    /// Age limit after which the sweeper reclaims a proxy.
    pub fn proxy_lifetime(&self) -> Duration {
        self.proxy_lifetime
    }

    /// The registry of active proxies.
    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    /// Number of currently active proxies.
    pub fn active_proxies(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let endpoint = ProxyEndpoint {
            address: "play.example.com".to_string(),
            port: 40001,
        };
        assert_eq!(endpoint.to_string(), "play.example.com:40001");
    }
}
