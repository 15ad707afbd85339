//! Model catalog
//!
//! In-process cache of the provider-model registry. The full set of variants
//! and families is loaded as one immutable snapshot with a TTL; invalidation
//! replaces the snapshot wholesale. Lookup works by caller-facing `model_id`
//! or by `provider_model_id`, since callers send either form.

pub mod variant;

pub use variant::{AdapterKind, FamilyConfig, ModelVariant, PricingMethod, ScoreRange};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::storage::{Database, queries};
use crate::utils::error::{GatewayError, Result};

/// One immutable catalog snapshot
#[derive(Debug)]
pub struct CatalogSnapshot {
    variants: Vec<Arc<ModelVariant>>,
    by_model_id: HashMap<String, Vec<usize>>,
    by_provider_model_id: HashMap<String, Vec<usize>>,
    families: HashMap<String, Arc<FamilyConfig>>,
    loaded_at: Instant,
}

impl CatalogSnapshot {
    /// Index a set of variants and families
    pub fn build(variants: Vec<ModelVariant>, families: Vec<FamilyConfig>) -> Self {
        let variants: Vec<Arc<ModelVariant>> = variants.into_iter().map(Arc::new).collect();

        let mut by_model_id: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_provider_model_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, v) in variants.iter().enumerate() {
            by_model_id.entry(v.model_id.clone()).or_default().push(i);
            by_provider_model_id
                .entry(v.provider_model_id.clone())
                .or_default()
                .push(i);
        }

        let families = families
            .into_iter()
            .map(|f| (f.family_id.clone(), Arc::new(f)))
            .collect();

        Self {
            variants,
            by_model_id,
            by_provider_model_id,
            families,
            loaded_at: Instant::now(),
        }
    }

    fn variants_at(&self, indices: Option<&Vec<usize>>) -> Vec<Arc<ModelVariant>> {
        indices
            .map(|ix| ix.iter().map(|&i| self.variants[i].clone()).collect())
            .unwrap_or_default()
    }
}

/// Process-wide model catalog with TTL refresh
pub struct ModelCatalog {
    db: Option<Database>,
    ttl: Duration,
    snapshot: ArcSwapOption<CatalogSnapshot>,
    refresh_lock: Mutex<()>,
}

impl ModelCatalog {
    /// Catalog backed by the registry tables
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self {
            db: Some(db),
            ttl,
            snapshot: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Catalog over a fixed in-memory set; never expires (tests, tooling)
    pub fn with_static(variants: Vec<ModelVariant>, families: Vec<FamilyConfig>) -> Self {
        let catalog = Self {
            db: None,
            ttl: Duration::MAX,
            snapshot: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        };
        catalog
            .snapshot
            .store(Some(Arc::new(CatalogSnapshot::build(variants, families))));
        catalog
    }

    /// Current snapshot, reloading from the registry when stale or absent
    pub async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>> {
        if let Some(snap) = self.snapshot.load_full() {
            if snap.loaded_at.elapsed() < self.ttl {
                return Ok(snap);
            }
        }
        self.reload().await
    }

    /// Drop the cached snapshot; the next lookup reloads
    pub fn invalidate(&self) {
        if self.db.is_some() {
            info!("Model catalog invalidated");
            self.snapshot.store(None);
        }
    }

    async fn reload(&self) -> Result<Arc<CatalogSnapshot>> {
        let Some(db) = &self.db else {
            // Static catalogs never reload
            return self.snapshot.load_full().ok_or_else(|| {
                GatewayError::Internal("static catalog has no snapshot".to_string())
            });
        };

        // One refresh at a time; latecomers reuse the fresh snapshot
        let _guard = self.refresh_lock.lock().await;
        if let Some(snap) = self.snapshot.load_full() {
            if snap.loaded_at.elapsed() < self.ttl {
                return Ok(snap);
            }
        }

        let rows = queries::load_model_variants(db.conn()).await?;
        let variants: Vec<ModelVariant> = rows
            .into_iter()
            .filter_map(ModelVariant::from_entity)
            .collect();

        let mut families = Vec::new();
        for row in queries::load_families(db.conn()).await? {
            let family_id = row.family_id.clone();
            match FamilyConfig::from_entity(row) {
                Ok(f) => families.push(f),
                Err(e) => warn!("Skipping family '{}': {}", family_id, e),
            }
        }

        debug!(
            "Catalog reloaded: {} variants, {} families",
            variants.len(),
            families.len()
        );

        let snap = Arc::new(CatalogSnapshot::build(variants, families));
        self.snapshot.store(Some(snap.clone()));
        Ok(snap)
    }

    /// All variants
    pub async fn all_variants(&self) -> Result<Vec<Arc<ModelVariant>>> {
        Ok(self.snapshot().await?.variants.clone())
    }

    /// Variants matching a caller-supplied id, by `model_id` first and by
    /// `provider_model_id` when nothing matches
    pub async fn variants_for_model_id(&self, id: &str) -> Result<Vec<Arc<ModelVariant>>> {
        let snap = self.snapshot().await?;
        let direct = snap.variants_at(snap.by_model_id.get(id));
        if !direct.is_empty() {
            return Ok(direct);
        }
        Ok(snap.variants_at(snap.by_provider_model_id.get(id)))
    }

    /// Variants of one provider
    pub async fn variants_by_provider(&self, provider: &str) -> Result<Vec<Arc<ModelVariant>>> {
        let snap = self.snapshot().await?;
        Ok(snap
            .variants
            .iter()
            .filter(|v| v.provider == provider)
            .cloned()
            .collect())
    }

    /// Family configuration for a synthetic model id, if one exists
    pub async fn family_for(&self, model_id: &str) -> Result<Option<Arc<FamilyConfig>>> {
        Ok(self.snapshot().await?.families.get(model_id).cloned())
    }

    /// Variant lookup by exact (model_id, provider) pair
    pub async fn variant(
        &self,
        model_id: &str,
        provider: &str,
    ) -> Result<Option<Arc<ModelVariant>>> {
        Ok(self
            .variants_for_model_id(model_id)
            .await?
            .into_iter()
            .find(|v| v.provider == provider))
    }
}
