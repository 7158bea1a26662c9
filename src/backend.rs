//! Capability interface for the runtime that hosts forwarding containers.

use crate::error::BackendError;
use async_trait::async_trait;
use std::fmt;

/// Opaque identifier for one provisioned forwarding container.
///
/// Owned exclusively by the registry record for the container's port and used
/// for the later stop/remove pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub String);

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A runtime capable of hosting UDP forwarding containers.
///
/// `provision` must be effectively atomic from the caller's point of view:
/// either it returns a usable handle or it leaves no resource behind. In
/// particular, a create-succeeds/start-fails sequence must be cleaned up by
/// the implementer and surfaced as a single failure.
///
/// `stop` and `remove` are not required to be idempotent. The registry's
/// atomic removal guarantees at most one stop/remove pair is ever issued per
/// handle, so implementers never see a second teardown for the same handle.
///
/// None of these calls carry a deadline: a hung runtime blocks the one
/// logical operation that issued the call.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Health check, used once at startup. A failure is logged but does not
    /// abort startup.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Create and start a forwarding container relaying UDP traffic from
    /// `listen_port` to `upstream_host:upstream_port`.
    async fn provision(
        &self,
        listen_port: u32,
        upstream_host: &str,
        upstream_port: u16,
        name: &str,
    ) -> Result<BackendHandle, BackendError>;

    /// Stop a running forwarding container.
    async fn stop(&self, handle: &BackendHandle) -> Result<(), BackendError>;

    /// Remove a stopped forwarding container and its resources.
    async fn remove(&self, handle: &BackendHandle) -> Result<(), BackendError>;
}
