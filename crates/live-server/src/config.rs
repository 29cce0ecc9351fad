//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`LIVE_HOST`, `LIVE_PORT`, `LIVE_SECRET_KEY`)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tenvis_live_core::{HubConfig, ManagedStreamSettings};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    /// History kept on `stream/*` channels.
    #[serde(default)]
    pub streams: ManagedStreamSettings,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of channels across all orgs.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Maximum subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Per-channel broadcast buffer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How often expired history and idle channels are swept, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds, announced to clients.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u32,
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

/// Where channel configs are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// SQLite connection URL.
    #[serde(default = "default_sqlite_url")]
    pub url: String,
}

/// Secrets configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Base64-encoded 32-byte master key. A random key is used when unset.
    #[serde(default = "default_secret_key", skip_serializing)]
    pub key: Option<String>,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_host() -> String {
    std::env::var("LIVE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("LIVE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_secret_key() -> Option<String> {
    std::env::var("LIVE_SECRET_KEY").ok().filter(|k| !k.is_empty())
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_channels() -> usize {
    10_000
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_sweep_interval() -> u64 {
    30_000
}

fn default_heartbeat_interval() -> u32 {
    25_000
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_sqlite_url() -> String {
    "sqlite://live.db?mode=rwc".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            storage: StorageConfig::default(),
            secrets: SecretsConfig::default(),
            streams: ManagedStreamSettings::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            max_message_size: default_max_message_size(),
            channel_capacity: default_channel_capacity(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
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

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            key: default_secret_key(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: default_sqlite_url(),
        }
    }
}

impl LimitsConfig {
    /// Hub limits derived from these settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_channels: self.max_channels,
            max_subscriptions_per_connection: self.max_subscriptions_per_connection,
            channel_capacity: self.channel_capacity,
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "live.toml",
            "/etc/live/live.toml",
            "~/.config/live/live.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

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
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.limits.hub_config().max_channels, 10_000);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_channels = 500

            [storage]
            backend = "sqlite"
            url = "sqlite::memory:"

            [streams]
            history_size = 3
            history_ttl = 120
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_channels, 500);
        assert_eq!(config.limits.max_subscriptions_per_connection, 100);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.streams.history_size, 3);
        assert_eq!(config.streams.history_ttl, Some(Duration::from_secs(120)));
        assert_eq!(config.bind_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_bad_bind_addr_is_an_error() {
        let config: Config = toml::from_str(r#"host = "not a host""#).unwrap();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_secret_key_redacted() {
        let secrets = SecretsConfig {
            key: Some("c2VjcmV0".to_string()),
        };
        assert!(!format!("{secrets:?}").contains("c2VjcmV0"));
    }
}
