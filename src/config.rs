use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the service
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// HTTP API server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Proxy lifecycle configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Docker runtime configuration
    #[serde(default)]
    pub docker: DockerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address for the HTTP API (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// HTTP API port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Address clients connect to, e.g. "play.example.com".
    /// Overridden by the PUBLIC_ADDRESS environment variable.
    #[serde(default)]
    pub public_address: String,

    /// Port allocation starts directly above this port (default: 40000)
    #[serde(default = "default_base_port")]
    pub base_port: u32,

    /// Minutes before an active proxy is reclaimed (default: 59).
    /// Overridden by the PROXY_LIFETIME environment variable.
    #[serde(default = "default_lifetime_minutes")]
    pub lifetime_minutes: u64,

    /// Seconds between expiration sweep cycles (default: 60)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Host every forwarding container relays to
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,

    /// UDP port every forwarding container relays to
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,
}

impl ProxyConfig {
    /// Lifetime of a proxy as a duration.
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_minutes * 60)
    }

    /// Interval between sweep cycles as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            public_address: String::new(),
            base_port: default_base_port(),
            lifetime_minutes: default_lifetime_minutes(),
            sweep_interval_secs: default_sweep_interval(),
            upstream_host: default_upstream_host(),
            upstream_port: default_upstream_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DockerConfig {
    /// Explicit daemon address ("unix:///..." or "tcp://...").
    /// Falls back to DOCKER_HOST, then the platform default socket.
    pub host: Option<String>,

    /// Image used for forwarding containers (default: alpine/socat)
    #[serde(default = "default_image")]
    pub image: String,

    /// Docker network the containers join (default: proxy_network)
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            image: default_image(),
            network_mode: default_network_mode(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read config file {}", path.as_ref().display())
        })?;
        let mut config: Config =
            toml::from_str(&raw).context("failed to parse config file")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("PUBLIC_ADDRESS") {
            if !addr.trim().is_empty() {
                self.proxy.public_address = addr;
            }
        }
        if let Ok(lifetime) = std::env::var("PROXY_LIFETIME") {
            if let Ok(minutes) = lifetime.parse::<u64>() {
                self.proxy.lifetime_minutes = minutes;
            }
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_base_port() -> u32 {
    40000
}

fn default_lifetime_minutes() -> u64 {
    59
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_upstream_host() -> String {
    "172.54.1.2".to_string()
}

fn default_upstream_port() -> u16 {
    34197
}

fn default_image() -> String {
    "alpine/socat".to_string()
}

fn default_network_mode() -> String {
    "proxy_network".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.proxy.base_port, 40000);
        assert_eq!(config.proxy.lifetime_minutes, 59);
        assert_eq!(config.proxy.lifetime(), Duration::from_secs(59 * 60));
        assert_eq!(config.proxy.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.proxy.upstream_host, "172.54.1.2");
        assert_eq!(config.proxy.upstream_port, 34197);
        assert_eq!(config.docker.image, "alpine/socat");
        assert_eq!(config.docker.network_mode, "proxy_network");
        assert!(config.docker.host.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [server]
            port = 9090

            [proxy]
            public_address = "play.example.com"
            base_port = 50000
            lifetime_minutes = 30
            sweep_interval_secs = 15

            [docker]
            host = "tcp://127.0.0.1:2375"
            image = "alpine/socat:1.8"
        "#;

        let config: Config = toml::from_str(toml_str).expect("valid config");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.proxy.public_address, "play.example.com");
        assert_eq!(config.proxy.base_port, 50000);
        assert_eq!(config.proxy.lifetime(), Duration::from_secs(30 * 60));
        assert_eq!(config.proxy.sweep_interval_secs, 15);
        assert_eq!(config.docker.host.as_deref(), Some("tcp://127.0.0.1:2375"));
        assert_eq!(config.docker.image, "alpine/socat:1.8");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").expect("empty config is valid");
        assert_eq!(config.proxy.base_port, 40000);
        assert_eq!(config.proxy.lifetime_minutes, 59);
    }
}
