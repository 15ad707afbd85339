//! Application state shared across HTTP handlers

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::core::accounting::AccountingWorker;
use crate::core::adapters::AdapterFactory;
use crate::core::catalog::ModelCatalog;
use crate::core::family::{AdapterEvaluationClient, FamilyRouter};
use crate::core::metrics::SqlMetricsStore;
use crate::core::notify::ErrorNotifier;
use crate::core::orchestrator::{Orchestrator, SqlRequestSink};
use crate::core::selector::ProviderSelector;
use crate::storage::Database;
use crate::utils::error::Result;

/// Shared resources for all request handlers
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration (read-only)
    pub config: Arc<Config>,
    /// Shared database handle
    pub db: Database,
    /// Model catalog
    pub catalog: Arc<ModelCatalog>,
    /// Provider selection engine
    pub selector: Arc<ProviderSelector>,
    /// Request orchestrator
    pub orchestrator: Arc<Orchestrator>,
    /// Accounting worker
    pub accounting: Arc<AccountingWorker>,
}

impl AppState {
    /// Wire the whole pipeline together
    pub async fn build(config: Config) -> Result<Self> {
        let db = Database::connect(&config.database).await?;

        let catalog = Arc::new(ModelCatalog::new(
            db.clone(),
            Duration::from_secs(config.routing.catalog_ttl_secs),
        ));

        let metrics = Arc::new(SqlMetricsStore::new(
            db.clone(),
            config.routing.cache_history_hours,
        ));
        let selector = Arc::new(ProviderSelector::new(catalog.clone(), metrics));

        let adapters = AdapterFactory::new(&config.upstream)?;
        let family = Arc::new(FamilyRouter::new(
            catalog.clone(),
            Arc::new(AdapterEvaluationClient::new(adapters.clone())),
        ));

        let notifier = Arc::new(ErrorNotifier::new(&config.notifier));
        let sink = Arc::new(SqlRequestSink::new(db.clone()));

        let orchestrator = Arc::new(Orchestrator::new(
            catalog.clone(),
            selector.clone(),
            family,
            Arc::new(adapters),
            sink,
            notifier,
        ));

        let accounting = Arc::new(AccountingWorker::new(db.clone(), catalog.clone()));

        Ok(Self {
            config: Arc::new(config),
            db,
            catalog,
            selector,
            orchestrator,
            accounting,
        })
    }

    /// Periodic accounting runs; the webhook triggers the same worker
    pub fn spawn_background_tasks(&self) {
        let interval_secs = self.config.accounting.interval_secs;
        if interval_secs == 0 {
            info!("Periodic accounting disabled");
            return;
        }

        let accounting = self.accounting.clone();
        let batch_size = self.config.accounting.batch_size;
        let time_limit_ms = self.config.accounting.time_limit_ms;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match accounting.process_ready(batch_size, time_limit_ms).await {
                    Ok(stats) if stats.processed + stats.errors > 0 => {
                        info!(
                            "Periodic accounting: {} processed, {} errors",
                            stats.processed, stats.errors
                        );
                    }
                    Ok(_) => {}
                    // A webhook-triggered run may hold the flag; that is fine
                    Err(crate::utils::error::GatewayError::Conflict(_)) => {}
                    Err(e) => warn!("Periodic accounting failed: {}", e),
                }
            }
        });
    }
}
