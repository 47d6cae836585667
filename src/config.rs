//! Server configuration.
//!
//! Configuration is loaded from an optional TOML file and overridden by
//! command-line options. All sections have sensible defaults so the server
//! runs with no configuration at all.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listening socket settings.
    pub listener: ListenerConfig,

    /// Pub/sub broker settings.
    pub broker: BrokerConfig,

    /// WebSocket protocol timings.
    pub protocol: ProtocolConfig,

    /// Resource limits.
    pub limits: LimitsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Listening socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerConfig {
    /// Bind address.
    pub address: String,

    /// Bind port.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9999,
        }
    }
}

impl ListenerConfig {
    /// Get the socket address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        format!("{}:{}", self.address, self.port).parse().ok()
    }
}

/// Pub/sub broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    /// Broker host.
    pub address: String,

    /// Broker port.
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl BrokerConfig {
    /// Get the broker connection URL.
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.address, self.port)
    }
}

/// WebSocket protocol timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Keep-alive PING interval.
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,

    /// Read-idle timeout before the connection is destroyed.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound frame payload length.
    pub max_payload_len: u64,

    /// Maximum HTTP upgrade request size.
    pub max_handshake_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_len: 16 * 1024 * 1024, // 16 MiB
            max_handshake_size: 8192,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listener.port, 9999);
        assert_eq!(config.broker.port, 6379);
        assert_eq!(config.protocol.ping_interval, Duration::from_secs(30));
        assert_eq!(config.protocol.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.limits.max_payload_len, 16 * 1024 * 1024);
    }

    #[test]
    fn test_listener_socket_addr() {
        let listener = ListenerConfig {
            address: "127.0.0.1".to_string(),
            port: 9999,
        };
        let addr = listener.socket_addr().unwrap();
        assert_eq!(addr.port(), 9999);
    }

    #[test]
    fn test_broker_url() {
        let broker = BrokerConfig::default();
        assert_eq!(broker.url(), "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_deserialize_config() {
        let toml = r#"
            [listener]
            address = "0.0.0.0"
            port = 9000

            [broker]
            address = "redis.internal"
            port = 6380

            [protocol]
            ping_interval = "15s"
            idle_timeout = "2m"

            [limits]
            max_payload_len = 1048576
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.broker.address, "redis.internal");
        assert_eq!(config.protocol.ping_interval, Duration::from_secs(15));
        assert_eq!(config.protocol.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.limits.max_payload_len, 1_048_576);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listener.address, "0.0.0.0");
        assert_eq!(config.broker.port, 6379);
    }
}
