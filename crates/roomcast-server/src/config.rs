//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (ROOMCAST_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use roomcast_core::{OutboundConfig, RelayConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Relay tuning.
    #[serde(default)]
    pub relay: RelaySettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Relay tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Maximum bytes relayed per read.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Messages buffered per peer before new ones are dropped.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Maximum time a single write to a peer may take, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Handshake read timeout in milliseconds. Unset waits indefinitely.
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,

    /// Capacity of the dispatcher's request queue.
    #[serde(default = "default_dispatcher_queue_capacity")]
    pub dispatcher_queue_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("ROOMCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("ROOMCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(7000)
}

fn default_true() -> bool {
    true
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_write_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_dispatcher_queue_capacity() -> usize {
    1024
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            relay: RelaySettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            write_timeout_ms: default_write_timeout(),
            handshake_timeout_ms: None,
            dispatcher_queue_capacity: default_dispatcher_queue_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// `ROOMCAST_CONFIG` names an explicit file; otherwise the default paths
    /// are searched in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// `ROOMCAST_CONFIG` points at a missing file.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("ROOMCAST_CONFIG") {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        // Try to load from default paths
        let config_paths = [
            "roomcast.toml",
            "/etc/roomcast/roomcast.toml",
            "~/.config/roomcast/roomcast.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Relay settings in the form the relay consumes.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            session: SessionConfig {
                read_buffer_size: self.relay.read_buffer_size,
                handshake_timeout: self.relay.handshake_timeout_ms.map(Duration::from_millis),
                outbound: OutboundConfig {
                    queue_capacity: self.relay.outbound_queue_capacity,
                    write_timeout: Duration::from_millis(self.relay.write_timeout_ms),
                },
            },
            dispatcher_queue_capacity: self.relay.dispatcher_queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_relay_settings() {
        let settings = RelaySettings::default();
        assert_eq!(settings.read_buffer_size, 4096);
        assert_eq!(settings.outbound_queue_capacity, 64);
        assert_eq!(settings.write_timeout_ms, 5_000);
        assert!(settings.handshake_timeout_ms.is_none());
    }

    #[test]
    fn test_config_bind_addr() {
        let config: Config = toml::from_str("host = \"0.0.0.0\"\nport = 7100").unwrap();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 7100);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn test_config_bind_addr_invalid_host() {
        let config: Config = toml::from_str("host = \"not a host\"").unwrap();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [relay]
            outbound_queue_capacity = 8
            handshake_timeout_ms = 1500

            [metrics]
            enabled = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.relay.outbound_queue_capacity, 8);
        assert_eq!(config.relay.read_buffer_size, 4096);
        assert!(!config.metrics.enabled);

        let relay = config.relay_config();
        assert_eq!(relay.session.outbound.queue_capacity, 8);
        assert_eq!(
            relay.session.handshake_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(relay.session.outbound.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_missing_file() {
        assert!(Config::from_file("/nonexistent/roomcast.toml").is_err());
    }
}
