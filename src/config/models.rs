//! Configuration section models

use serde::{Deserialize, Serialize};

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Number of actix workers (0 = one per core)
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: 0,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (postgres://... or sqlite://...)
    pub url: String,
    /// Maximum pool connections
    pub max_connections: u32,
    /// Minimum pool connections
    pub min_connections: u32,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout_secs: 10,
        }
    }
}

/// Routing and provider-selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Default price/performance ratio when the caller sends none (0..=100)
    pub default_ratio_sp: u8,
    /// How many recent metric rows feed the throughput/latency medians
    pub metrics_window_size: u32,
    /// How long a catalog snapshot stays valid, in seconds
    pub catalog_ttl_secs: u64,
    /// How far back cache-affinity history is considered, in hours
    pub cache_history_hours: i64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_ratio_sp: 50,
            metrics_window_size: 10,
            catalog_ttl_secs: 300,
            cache_history_hours: 24,
        }
    }
}

/// Accounting worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// Records per invocation
    pub batch_size: u64,
    /// Soft deadline per invocation, in milliseconds
    pub time_limit_ms: u64,
    /// Seconds between periodic runs (0 disables the periodic task)
    pub interval_secs: u64,
    /// Environment variable holding the webhook shared secret
    pub webhook_secret_env: String,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            time_limit_ms: 30_000,
            interval_secs: 60,
            webhook_secret_env: "WEBHOOK_SECRET".to_string(),
        }
    }
}

/// Upstream HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Total timeout for non-streaming calls, in seconds
    pub request_timeout_secs: u64,
    /// Connect timeout, in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout between chunks for streaming calls, in seconds
    pub stream_idle_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
            stream_idle_timeout_secs: 90,
        }
    }
}

/// Error notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook URL notified on transient upstream failures (None disables)
    pub webhook_url: Option<String>,
    /// Queue capacity; events beyond it are dropped
    pub queue_capacity: usize,
    /// Per-send timeout in seconds
    pub send_timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            queue_capacity: 256,
            send_timeout_secs: 5,
        }
    }
}
