//! Metric & cache-history store (read side)
//!
//! Two batched reads feed the provider selector: recent-window
//! throughput/latency medians per (model, provider), and per-user prompt
//! cache history. Medians are computed in-process over the most recent
//! `window_size` samples.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::storage::{Database, queries};
use crate::utils::error::Result;

/// Aggregated metrics for one (provider, model) pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProviderMetrics {
    /// Median output tokens per second over the window; `None` without samples
    pub throughput_median: Option<f64>,
    /// Median time-to-first-chunk in milliseconds; `None` without samples
    pub latency_median: Option<f64>,
    /// Number of samples in the window
    pub sample_count: u32,
}

/// Read-side source of routing metrics and cache history
///
/// The selector only sees this trait; the production implementation reads
/// the metrics tables, tests substitute fixed maps.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Medians of the most recent `window_size` samples per provider.
    ///
    /// Every requested provider gets an entry; providers without samples get
    /// `None` medians and a zero sample count.
    async fn provider_metrics_batch(
        &self,
        model_id: &str,
        providers: &[String],
        window_size: u32,
    ) -> Result<HashMap<String, ProviderMetrics>>;

    /// True per provider iff the user has at least one recent request for
    /// (provider, model) with cached tokens.
    async fn user_cache_history_batch(
        &self,
        user_id: Uuid,
        model_id: &str,
        providers: &[String],
    ) -> Result<HashMap<String, bool>>;
}

/// Median of a sample set; `None` when empty
fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Database-backed metrics source
pub struct SqlMetricsStore {
    db: Database,
    cache_history_hours: i64,
}

impl SqlMetricsStore {
    /// Create a store over the shared database
    pub fn new(db: Database, cache_history_hours: i64) -> Self {
        Self {
            db,
            cache_history_hours,
        }
    }
}

#[async_trait]
impl MetricsSource for SqlMetricsStore {
    async fn provider_metrics_batch(
        &self,
        model_id: &str,
        providers: &[String],
        window_size: u32,
    ) -> Result<HashMap<String, ProviderMetrics>> {
        let mut out = HashMap::with_capacity(providers.len());

        for provider in providers {
            let samples = queries::recent_metric_samples(
                self.db.conn(),
                model_id,
                provider,
                window_size as u64,
            )
            .await?;

            let throughputs: Vec<f64> = samples
                .iter()
                .filter_map(|s| s.throughput_tokens_per_s)
                .collect();
            let latencies: Vec<f64> = samples
                .iter()
                .filter_map(|s| s.time_to_first_chunk_ms.map(|v| v as f64))
                .collect();

            out.insert(
                provider.clone(),
                ProviderMetrics {
                    throughput_median: median(throughputs),
                    latency_median: median(latencies),
                    sample_count: samples.len() as u32,
                },
            );
        }

        Ok(out)
    }

    async fn user_cache_history_batch(
        &self,
        user_id: Uuid,
        model_id: &str,
        providers: &[String],
    ) -> Result<HashMap<String, bool>> {
        let since = Utc::now() - ChronoDuration::hours(self.cache_history_hours);
        let with_history = queries::providers_with_cache_history(
            self.db.conn(),
            user_id,
            model_id,
            providers,
            since,
        )
        .await?;

        Ok(providers
            .iter()
            .map(|p| (p.clone(), with_history.contains(p)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_and_even_sets() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(vec![]), None);
        assert_eq!(median(vec![7.5]), Some(7.5));
    }
}
