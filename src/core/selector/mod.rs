//! Provider selector
//!
//! Given a caller-facing model id, filters the catalog's variants by
//! capability and ranks the survivors with a 3-D vector score over price,
//! throughput and latency, boosted by prompt-cache affinity. The selector
//! never executes a request; it returns an ordered candidate set.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::core::catalog::{ModelCatalog, ModelVariant};
use crate::core::metrics::{MetricsSource, ProviderMetrics};
use crate::core::types::ChatCompletionRequest;
use crate::utils::error::{GatewayError, Result};
use crate::utils::text::approx_tokens;

/// Flat token charge per image content part
const IMAGE_TOKEN_ESTIMATE: u32 = 1000;

/// Tuning knobs for one selection
#[derive(Debug, Clone)]
pub struct SelectionOptions {
    /// Price/performance ratio: 0 = cheapest, 100 = fastest
    pub ratio_sp: u8,
    /// Recent-window size feeding the throughput/latency medians
    pub metrics_window_size: u32,
    /// Caller-supplied provider whitelist
    pub provider_whitelist: Option<Vec<String>>,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            ratio_sp: 50,
            metrics_window_size: 10,
            provider_whitelist: None,
        }
    }
}

/// One ranked candidate
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The deployment
    pub variant: Arc<ModelVariant>,
    /// Distance to the optimal point; lower ranks earlier
    pub score: f64,
    /// The user is expected to hit this variant's prompt cache
    pub has_cache_affinity: bool,
    /// Window metrics that fed the score
    pub metrics: ProviderMetrics,
}

/// Ordered list of candidates for one request
pub type CandidateSet = Vec<Candidate>;

/// Estimated token demand of a request
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimate {
    /// Text plus image input tokens
    pub input_tokens: u32,
    /// Requested completion budget
    pub max_tokens: u32,
}

impl TokenEstimate {
    /// Context-window demand: input plus completion budget
    pub fn total(&self) -> u32 {
        self.input_tokens + self.max_tokens
    }
}

/// Rough token demand: ⌈chars/4⌉ per message text, a flat charge per image,
/// plus the requested completion budget.
pub fn estimate_tokens(request: &ChatCompletionRequest) -> TokenEstimate {
    let text_tokens: u32 = request
        .messages
        .iter()
        .map(|m| approx_tokens(&m.text_content()))
        .sum();
    let image_tokens = request.image_count() * IMAGE_TOKEN_ESTIMATE;

    TokenEstimate {
        input_tokens: text_tokens + image_tokens,
        max_tokens: request.max_tokens.unwrap_or(0),
    }
}

/// Capability filter + 3-D scoring engine
pub struct ProviderSelector {
    catalog: Arc<ModelCatalog>,
    metrics: Arc<dyn MetricsSource>,
}

impl ProviderSelector {
    /// Create over the catalog and a metrics source
    pub fn new(catalog: Arc<ModelCatalog>, metrics: Arc<dyn MetricsSource>) -> Self {
        Self { catalog, metrics }
    }

    /// Filter and rank the variants able to serve `request`.
    ///
    /// Ordering: cache-affinity candidates strictly first, then ascending
    /// vector score, then provider name for determinism.
    pub async fn filter_providers(
        &self,
        request: &ChatCompletionRequest,
        user_id: Uuid,
        options: &SelectionOptions,
    ) -> Result<CandidateSet> {
        if request.model.is_empty() {
            return Err(GatewayError::Validation("model is required".to_string()));
        }

        let variants = self.catalog.variants_for_model_id(&request.model).await?;
        if variants.is_empty() {
            return Err(GatewayError::NoCandidates {
                model: request.model.clone(),
                diagnostics: vec!["no variants registered for this model".to_string()],
            });
        }

        let needs_tools = request.tools.as_ref().is_some_and(|t| !t.is_empty());
        let needs_vision = request.has_image_content();
        let estimate = estimate_tokens(request);

        // 1. Capability filter, tracking why each variant fell out
        let mut survivors: Vec<Arc<ModelVariant>> = Vec::new();
        let mut diagnostics: Vec<String> = Vec::new();
        for variant in variants {
            if let Some(whitelist) = &options.provider_whitelist {
                if !whitelist.iter().any(|p| p == &variant.provider) {
                    diagnostics
                        .push(format!("{}: not in requested provider list", variant.provider));
                    continue;
                }
            }
            if needs_tools && !variant.supports_tool_calling {
                diagnostics.push(format!("{}: no tool calling", variant.provider));
                continue;
            }
            if needs_vision && !variant.supports_vision {
                diagnostics.push(format!("{}: no vision", variant.provider));
                continue;
            }
            if let Some(window) = variant.context_window {
                if estimate.total() > window {
                    diagnostics.push(format!(
                        "{}: context window {} < {} estimated tokens",
                        variant.provider,
                        window,
                        estimate.total()
                    ));
                    continue;
                }
            }
            survivors.push(variant);
        }

        if survivors.is_empty() {
            return Err(GatewayError::NoCandidates {
                model: request.model.clone(),
                diagnostics,
            });
        }

        // 2. Batched reads for the survivors
        let providers: Vec<String> = survivors.iter().map(|v| v.provider.clone()).collect();
        let metrics_by_provider = self
            .metrics
            .provider_metrics_batch(&request.model, &providers, options.metrics_window_size)
            .await?;
        let affinity = self
            .cache_affinity(&survivors, user_id, &request.model, &providers)
            .await?;

        // 3. Score and order
        let mut candidates = score_candidates(
            survivors,
            &metrics_by_provider,
            &affinity,
            options.ratio_sp,
        );

        candidates.sort_by(|a, b| {
            b.has_cache_affinity
                .cmp(&a.has_cache_affinity)
                .then(a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.variant.provider.cmp(&b.variant.provider))
        });

        debug!(
            "Ranked {} candidates for {}: {:?}",
            candidates.len(),
            request.model,
            candidates
                .iter()
                .map(|c| (&c.variant.provider, c.score, c.has_cache_affinity))
                .collect::<Vec<_>>()
        );

        Ok(candidates)
    }

    /// Cache affinity per survivor.
    ///
    /// Skips the history read entirely when no survivor supports caching.
    /// With cache-capable survivors but no history anywhere, every capable
    /// variant counts as potentially cacheable; once the user has history,
    /// only providers with history keep the affinity.
    async fn cache_affinity(
        &self,
        survivors: &[Arc<ModelVariant>],
        user_id: Uuid,
        model_id: &str,
        providers: &[String],
    ) -> Result<HashMap<String, bool>> {
        if !survivors.iter().any(|v| v.supports_input_cache) {
            return Ok(HashMap::new());
        }

        let history = self
            .metrics
            .user_cache_history_batch(user_id, model_id, providers)
            .await?;
        let has_any_history = history.values().any(|&h| h);

        Ok(survivors
            .iter()
            .map(|v| {
                let affinity = v.supports_input_cache
                    && (!has_any_history
                        || history.get(&v.provider).copied().unwrap_or(false));
                (v.provider.clone(), affinity)
            })
            .collect())
    }
}

/// Score every survivor against the optimal point `(1-r, r, r)`.
///
/// Axes are normalized over the surviving set so that 1 is always the
/// desirable end: cheapest, highest throughput, lowest latency. Missing
/// medians sit at the neutral 0.5.
fn score_candidates(
    survivors: Vec<Arc<ModelVariant>>,
    metrics_by_provider: &HashMap<String, ProviderMetrics>,
    affinity: &HashMap<String, bool>,
    ratio_sp: u8,
) -> Vec<Candidate> {
    let prices: Vec<f64> = survivors.iter().map(|v| v.total_price()).collect();
    let (min_price, max_price) = bounds(&prices);

    let throughputs: Vec<f64> = survivors
        .iter()
        .filter_map(|v| {
            metrics_by_provider
                .get(&v.provider)
                .and_then(|m| m.throughput_median)
        })
        .collect();
    let (min_t, max_t) = bounds(&throughputs);

    let latencies: Vec<f64> = survivors
        .iter()
        .filter_map(|v| {
            metrics_by_provider
                .get(&v.provider)
                .and_then(|m| m.latency_median)
        })
        .collect();
    let (min_l, max_l) = bounds(&latencies);

    let r = f64::from(ratio_sp) / 100.0;
    let optimal = (1.0 - r, r, r);

    survivors
        .into_iter()
        .map(|variant| {
            let metrics = metrics_by_provider
                .get(&variant.provider)
                .copied()
                .unwrap_or_default();

            // Price axis inverted so 1 = cheapest; degenerate spread scores 0
            let p_norm = if max_price > min_price {
                (max_price - variant.total_price()) / (max_price - min_price)
            } else {
                0.0
            };
            let t_norm = match metrics.throughput_median {
                Some(t) if max_t > min_t => (t - min_t) / (max_t - min_t),
                _ => 0.5,
            };
            // Latency axis inverted so 1 = fastest
            let l_norm = match metrics.latency_median {
                Some(l) if max_l > min_l => 1.0 - (l - min_l) / (max_l - min_l),
                _ => 0.5,
            };

            let d = ((p_norm - optimal.0).powi(2)
                + (t_norm - optimal.1).powi(2)
                + (l_norm - optimal.2).powi(2))
            .sqrt();

            let has_cache_affinity = affinity.get(&variant.provider).copied().unwrap_or(false);
            let score = if has_cache_affinity { 0.5 * d } else { d };

            Candidate {
                variant,
                score,
                has_cache_affinity,
                metrics,
            }
        })
        .collect()
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}
