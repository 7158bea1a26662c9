//! Docker adapter for the [`Backend`] capability.
//!
//! Each forwarding unit is a socat container listening for UDP traffic on the
//! allocated host port and relaying it to the fixed upstream server.

use crate::backend::{Backend, BackendHandle};
use crate::error::BackendError;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Seconds Docker waits after SIGTERM before killing a container on stop
const STOP_TIMEOUT_SECS: i64 = 10;

/// Runs each forwarding unit as a Docker container.
pub struct DockerBackend {
    client: Docker,
    image: String,
    network_mode: String,
}

impl DockerBackend {
    /// Connect to the Docker daemon.
    ///
    /// Connection priority:
    /// 1. Explicit docker_host parameter
    /// 2. DOCKER_HOST environment variable
    /// 3. Platform default socket
    ///
    /// The daemon is not pinged here; callers run [`Backend::ping`] once at
    /// startup and decide what a failure means.
    pub fn new(
        docker_host: Option<&str>,
        image: String,
        network_mode: String,
    ) -> anyhow::Result<Self> {
        let client = if let Some(host) = docker_host {
            Self::connect_to_host(host)?
        } else if let Ok(host) = std::env::var("DOCKER_HOST") {
            Self::connect_to_host(&host)?
        } else {
            Docker::connect_with_socket_defaults().map_err(|e| {
                anyhow::anyhow!(
                    "Cannot connect to Docker daemon via the default socket: {}. \
                     Ensure dockerd is running or set DOCKER_HOST.",
                    e
                )
            })?
        };

        debug!(image, network_mode, "Docker client created");
        Ok(Self {
            client,
            image,
            network_mode,
        })
    }

    fn connect_to_host(host: &str) -> anyhow::Result<Docker> {
        if host.starts_with("unix://") {
            let socket_path = host.trim_start_matches("unix://");
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    anyhow::anyhow!("Cannot connect to Unix socket '{}': {}", socket_path, e)
                })
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("Cannot connect to TCP endpoint '{}': {}", host, e))
        } else {
            anyhow::bail!(
                "Invalid docker host format: '{}'. Expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )
        }
    }

    /// Pull the forwarder image unless it is already present locally.
    pub async fn pull_image_if_absent(&self) -> Result<(), BackendError> {
        if self.client.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image exists locally, skipping pull");
            return Ok(());
        }

        info!(image = %self.image, "Pulling forwarder image");
        let options = CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let progress = result?;
            if let Some(status) = progress.status {
                debug!(image = %self.image, status, "Pull progress");
            }
            if let Some(error) = progress.error {
                return Err(BackendError::Other(format!(
                    "failed to pull image '{}': {}",
                    self.image, error
                )));
            }
        }

        info!(image = %self.image, "Image pulled");
        Ok(())
    }
}

#[async_trait]
impl Backend for DockerBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        self.client.ping().await?;
        Ok(())
    }

    async fn provision(
        &self,
        listen_port: u32,
        upstream_host: &str,
        upstream_port: u16,
        name: &str,
    ) -> Result<BackendHandle, BackendError> {
        // The image's entrypoint already runs socat, so only its two
        // address arguments are passed.
        let cmd = vec![
            format!("UDP-LISTEN:{},reuseaddr,fork", listen_port),
            format!("UDP:{}:{}", upstream_host, upstream_port),
        ];

        let port_key = format!("{}/udp", listen_port);
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::new());

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        port_bindings.insert(
            port_key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(listen_port.to_string()),
            }]),
        );

        let container_config = Config {
            image: Some(self.image.clone()),
            cmd: Some(cmd),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                network_mode: Some(self.network_mode.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(create_options), container_config)
            .await?;
        let container_id = response.id;
        info!(listen_port, container_id, name, "Created forwarding container");

        if let Err(e) = self
            .client
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            // Leave no resource behind: the created container is removed
            // before the start failure is surfaced as a single error.
            warn!(
                listen_port,
                container_id,
                error = %e,
                "Container failed to start, removing it"
            );
            if let Err(remove_err) = self.remove(&BackendHandle(container_id.clone())).await {
                warn!(
                    container_id,
                    error = %remove_err,
                    "Failed to remove container after start failure"
                );
            }
            return Err(BackendError::StartFailed {
                container_id,
                reason: e.to_string(),
            });
        }

        info!(listen_port, container_id, "Started forwarding container");
        Ok(BackendHandle(container_id))
    }

    async fn stop(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };

        match self.client.stop_container(&handle.0, Some(options)).await {
            Ok(_) => {
                info!(container_id = %handle, "Stopped forwarding container");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(container_id = %handle, "Container was already stopped");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container_id = %handle, "Container not found");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.client.remove_container(&handle.0, Some(options)).await {
            Ok(_) => {
                info!(container_id = %handle, "Removed forwarding container");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container_id = %handle, "Container not found");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
