//! Error types for provisioning and container teardown.

use thiserror::Error;

/// A failure reported by the container backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The Docker API returned an error.
    #[error("docker api error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// The container was created but refused to start. The adapter has
    /// already made a best-effort attempt to remove the created container.
    #[error("container {container_id} failed to start: {reason}")]
    StartFailed {
        container_id: String,
        reason: String,
    },

    /// Adapter-specific failure that is not a Docker API error.
    #[error("{0}")]
    Other(String),
}

/// A failure while provisioning a new proxy.
///
/// No registry entry exists after a `ProvisionError`: the failed attempt
/// leaves no trace and the caller may simply retry with a fresh create call.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The backend could not create or start the forwarding container.
    #[error("provisioning failed on port {port}: {source}")]
    Backend {
        port: u32,
        #[source]
        source: BackendError,
    },
}

impl ProvisionError {
    /// The listen port the failed attempt had allocated. Never reused.
    pub fn port(&self) -> u32 {
        match self {
            ProvisionError::Backend { port, .. } => *port,
        }
    }
}
