//! Configuration management for the gateway
//!
//! This module handles loading and validation of all gateway configuration.

pub mod models;

pub use models::*;

use crate::utils::error::{GatewayError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Main configuration struct for the gateway
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Routing and selection configuration
    pub routing: RoutingConfig,
    /// Accounting worker configuration
    pub accounting: AccountingConfig,
    /// Upstream HTTP client configuration
    pub upstream: UpstreamConfig,
    /// Error notification configuration
    pub notifier: NotifierConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {:?}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let mut config = Config::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| GatewayError::Config(format!("Invalid PORT value: {}", port)))?;
        }
        if let Ok(host) = std::env::var("HOST") {
            config.server.host = host;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from `MODELMUX_CONFIG` (or the default path) with env overrides
    pub async fn load() -> Result<Self> {
        let path = std::env::var("MODELMUX_CONFIG")
            .unwrap_or_else(|_| "config/gateway.yaml".to_string());

        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path).await?
        } else {
            info!("No config file at {}, using defaults", path);
            Config::default()
        };

        // Environment always wins over the file
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| GatewayError::Config(format!("Invalid PORT value: {}", port)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(GatewayError::Config(
                "server.port must be greater than 0".to_string(),
            ));
        }
        if self.database.url.is_empty() {
            return Err(GatewayError::Config(
                "database.url must not be empty (set DATABASE_URL)".to_string(),
            ));
        }
        if self.routing.default_ratio_sp > 100 {
            return Err(GatewayError::Config(
                "routing.default_ratio_sp must be in 0..=100".to_string(),
            ));
        }
        if self.routing.metrics_window_size == 0 {
            return Err(GatewayError::Config(
                "routing.metrics_window_size must be greater than 0".to_string(),
            ));
        }
        if self.accounting.batch_size == 0 {
            return Err(GatewayError::Config(
                "accounting.batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_without_database_url() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        let mut config = Config::default();
        config.database.url = "sqlite::memory:".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ratio_out_of_range_fails() {
        let mut config = Config::default();
        config.database.url = "sqlite::memory:".to_string();
        config.routing.default_ratio_sp = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_roundtrip_with_partial_sections() {
        let yaml = r#"
server:
  port: 9000
database:
  url: "postgres://localhost/mux"
routing:
  default_ratio_sp: 30
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.routing.default_ratio_sp, 30);
        // untouched sections keep their defaults
        assert_eq!(config.accounting.time_limit_ms, 30_000);
        assert!(config.validate().is_ok());
    }
}
