//! Configuration for osb-daemon

use osb_types::{Catalog, RetryPolicy};
use osb_upstream::UpstreamConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upstream provisioning API
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Broker behaviour
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Services and plans served from `/v2/catalog`
    #[serde(default)]
    pub catalog: Catalog,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
            max_body_size: default_max_body_size(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,

        /// Backoff for connection-class failures
        #[serde(default)]
        retry: RetryPolicy,
    },
}

/// When the broker runs provision and deprovision in the background
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncMode {
    /// Always synchronous, `accepts_incomplete` is ignored
    Disabled,
    /// Background work when the platform sends `accepts_incomplete=true`
    #[default]
    Optional,
    /// Requests without `accepts_incomplete=true` are refused
    Required,
}

/// Broker behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub async_mode: AsyncMode,

    /// Prefix for the per-instance dashboard link
    #[serde(default = "default_dashboard_base_url")]
    pub dashboard_base_url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            async_mode: AsyncMode::default(),
            dashboard_base_url: default_dashboard_base_url(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Age after which an `in progress` operation is declared failed
    #[serde(default = "default_operation_ttl")]
    pub operation_ttl_secs: u64,

    /// Age after which a finished operation of a deleted instance is pruned
    #[serde(default = "default_terminal_retention")]
    pub terminal_retention_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            operation_ttl_secs: default_operation_ttl(),
            terminal_retention_secs: default_terminal_retention(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_dashboard_base_url() -> String {
    "https://waf.example.com/dashboard".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_operation_ttl() -> u64 {
    3600
}

fn default_terminal_retention() -> u64 {
    86_400
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `OSB_*`
    /// environment variables (`OSB_UPSTREAM__BASE_URL` sets `upstream.base_url`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("OSB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.broker.async_mode, AsyncMode::Optional);
        assert_eq!(config.upstream.retry.max_retries, 3);
    }

    #[test]
    fn test_scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.operation_ttl_secs, 3600);
        assert_eq!(config.terminal_retention_secs, 86_400);
    }

    #[test]
    fn test_postgres_storage_from_json() {
        let storage: StorageConfig = serde_json::from_value(serde_json::json!({
            "type": "postgres",
            "url": "postgres://localhost/osb",
        }))
        .unwrap();

        match storage {
            StorageConfig::Postgres {
                url,
                max_connections,
                retry,
                ..
            } => {
                assert_eq!(url, "postgres://localhost/osb");
                assert_eq!(max_connections, 10);
                assert_eq!(retry, RetryPolicy::default());
            }
            StorageConfig::Memory => panic!("expected postgres"),
        }
    }

    #[test]
    fn test_async_mode_spelling() {
        let mode: AsyncMode = serde_json::from_str("\"required\"").unwrap();
        assert_eq!(mode, AsyncMode::Required);
    }
}
