//! Database storage implementation using SeaORM
//!
//! This module provides database connectivity, the persisted entities, and a
//! typed query layer used by the catalog, the metrics store, the
//! orchestrator, and the accounting worker.

pub mod entities;
pub mod queries;

use std::time::Duration;

use sea_orm::{ConnectOptions, DatabaseConnection};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::utils::error::Result;

/// Shared database handle
#[derive(Debug, Clone)]
pub struct Database {
    conn: DatabaseConnection,
}

impl Database {
    /// Connect using the configured pool settings
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database");

        let mut options = ConnectOptions::new(config.url.clone());
        options
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let conn = sea_orm::Database::connect(options).await?;

        Ok(Self { conn })
    }

    /// Wrap an existing connection (tests)
    pub fn from_connection(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Borrow the underlying connection
    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }
}
