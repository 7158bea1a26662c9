use relaygate::api::{ApiServer, PKG_NAME, VERSION};
use relaygate::backend::Backend;
use relaygate::config::Config;
use relaygate::docker::DockerBackend;
use relaygate::manager::ProxyManager;
use relaygate::sweeper::ExpirationSweeper;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relaygate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration: optional TOML file, env overrides on top
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            let config = Config::load(&path).map_err(|e| {
                error!(path = %path.display(), error = %e, "Failed to load configuration");
                e
            })?;
            info!(path = %path.display(), "Configuration loaded");
            config
        }
        None => Config::from_env(),
    };

    info!(name = PKG_NAME, version = VERSION, "Starting");
    if config.proxy.public_address.is_empty() {
        error!("Public address is not configured (set PUBLIC_ADDRESS); endpoints will be unusable");
    }
    info!(
        public_address = %config.proxy.public_address,
        base_port = config.proxy.base_port,
        lifetime_minutes = config.proxy.lifetime_minutes,
        sweep_interval_secs = config.proxy.sweep_interval_secs,
        upstream = %format!("{}:{}", config.proxy.upstream_host, config.proxy.upstream_port),
        "Proxy settings"
    );
    info!(
        image = %config.docker.image,
        network_mode = %config.docker.network_mode,
        "Docker settings"
    );

    // Connect to Docker. A failed startup ping degrades to failing on the
    // first create rather than refusing to start.
    let docker = DockerBackend::new(
        config.docker.host.as_deref(),
        config.docker.image.clone(),
        config.docker.network_mode.clone(),
    )?;

    match docker.ping().await {
        Ok(()) => {
            info!("Docker daemon ping succeeded");
            if let Err(e) = docker.pull_image_if_absent().await {
                error!(error = %e, "Failed to pull forwarder image; proxy creation may fail");
            }
        }
        Err(e) => error!(error = %e, "Docker daemon ping failed; proxy creation will fail until it recovers"),
    }

    let backend: Arc<dyn Backend> = Arc::new(docker);

    let manager = ProxyManager::new(&config.proxy, Arc::clone(&backend));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the expiration sweeper
    let sweeper = ExpirationSweeper::new(Arc::clone(&manager), config.proxy.sweep_interval());
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx.clone()));

    // Start the API server
    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;
    let api_server = ApiServer::new(bind_addr, Arc::clone(&manager), shutdown_rx.clone());
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and stop the sweeper before draining the registry, so
    // no new sweep cycle can queue removals while we tear down.
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        warn!(error = %e, "Sweeper task failed");
    }

    manager.shutdown().await;

    // Wait for the API server to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), api_handle).await;

    info!("Shutdown complete");
    Ok(())
}
