//! # modelmux
//!
//! An LLM API gateway. Accepts OpenAI-compatible chat/completion requests,
//! picks the best upstream (provider, model) deployment for each call using a
//! price/throughput/latency vector score with a prompt-cache affinity boost,
//! drives the upstream through a wire-dialect adapter with streaming and
//! fallback, and meters finished requests against user wallets through an
//! asynchronous accounting worker.
//!
//! ## Gateway mode
//!
//! ```rust,no_run
//! use modelmux::{Config, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config/gateway.yaml").await?;
//!     let gateway = Gateway::new(config).await?;
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod core;
pub mod server;
pub mod storage;
pub mod utils;

// Re-export main types
pub use config::Config;
pub use utils::error::{GatewayError, Result};

// Export the OpenAI-compatible type surface
pub use core::types::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ContentPart,
    MessageContent, MessageRole, Usage,
};

// Export the routing pipeline pieces embedders are most likely to want
pub use core::catalog::{ModelCatalog, ModelVariant, PricingMethod};
pub use core::selector::{ProviderSelector, SelectionOptions};

use tracing::info;

/// A complete gateway instance: HTTP server plus background workers.
pub struct Gateway {
    server: server::HttpServer,
}

impl Gateway {
    /// Create a new gateway instance
    pub async fn new(config: Config) -> Result<Self> {
        info!("Creating new gateway instance");

        let server = server::HttpServer::new(config).await?;

        Ok(Self { server })
    }

    /// Run the gateway server until shutdown
    pub async fn run(self) -> Result<()> {
        info!("Starting modelmux gateway");

        self.server.start().await?;

        Ok(())
    }
}

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
