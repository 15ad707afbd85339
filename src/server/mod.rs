//! HTTP server implementation
//!
//! This module provides the HTTP server, routing, authentication helpers
//! and the shared application state.

pub mod auth;
pub mod routes;
pub mod sse;
pub mod state;

pub use state::AppState;

use actix_web::{App, web};
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::config::Config;
use crate::utils::error::{GatewayError, Result};

/// Entry point used by the binary: load config, build, serve
pub async fn run_server() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load().await?;
    HttpServer::new(config).await?.start().await
}

/// The gateway's HTTP server plus its background workers
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Build the full pipeline and background tasks
    pub async fn new(config: Config) -> Result<Self> {
        let state = AppState::build(config).await?;
        state.spawn_background_tasks();
        Ok(Self { state })
    }

    /// Serve until shutdown
    pub async fn start(self) -> Result<()> {
        let host = self.state.config.server.host.clone();
        let port = self.state.config.server.port;
        let workers = self.state.config.server.workers;
        let state = self.state;

        info!("Listening on {}:{}", host, port);

        let mut server = actix_web::HttpServer::new(move || {
            App::new()
                .wrap(TracingLogger::default())
                .app_data(web::Data::new(state.clone()))
                .configure(routes::configure)
        })
        .bind((host.as_str(), port))
        .map_err(|e| GatewayError::Config(format!("failed to bind {}:{}: {}", host, port, e)))?;

        if workers > 0 {
            server = server.workers(workers);
        }

        server.run().await?;
        Ok(())
    }
}
