//! Model variant and family domain types

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::entities::{family, model};
use crate::utils::error::{GatewayError, Result};

/// Wire dialect a deployment speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// OpenAI chat-completions dialect (OpenAI, Azure, DeepInfra, DeepSeek,
    /// and most OpenAI-compatible hosts)
    OpenAi,
    /// Anthropic messages dialect
    Anthropic,
}

impl AdapterKind {
    /// Parse a registry string; `None` for dialects this build cannot speak
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" | "openai_compatible" | "azure" => Some(AdapterKind::OpenAi),
            "anthropic" => Some(AdapterKind::Anthropic),
            _ => None,
        }
    }
}

/// Pricing rule applied by the accounting worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMethod {
    Standard,
    AnthropicCache,
    #[serde(rename = "openai_cache_50")]
    OpenAiCache50,
    #[serde(rename = "openai_cache_75")]
    OpenAiCache75,
    DeepseekCache,
    GoogleCache,
    GoogleImplicit,
    GoogleExplicit,
    BedrockCache,
}

impl PricingMethod {
    /// Parse a registry string, defaulting unknown methods to `standard`
    pub fn parse(s: &str) -> Self {
        match s {
            "anthropic_cache" => PricingMethod::AnthropicCache,
            "openai_cache_50" => PricingMethod::OpenAiCache50,
            "openai_cache_75" => PricingMethod::OpenAiCache75,
            "deepseek_cache" => PricingMethod::DeepseekCache,
            "google_cache" => PricingMethod::GoogleCache,
            "google_implicit" => PricingMethod::GoogleImplicit,
            "google_explicit" => PricingMethod::GoogleExplicit,
            "bedrock_cache" => PricingMethod::BedrockCache,
            "standard" => PricingMethod::Standard,
            other => {
                warn!("Unknown pricing method '{}', using standard", other);
                PricingMethod::Standard
            }
        }
    }

    /// Discounted multiplier applied to cached tokens, when the method has one
    pub fn cached_rate(&self) -> Option<f64> {
        match self {
            PricingMethod::Standard => None,
            PricingMethod::OpenAiCache50 => Some(0.50),
            PricingMethod::OpenAiCache75 => Some(0.75),
            PricingMethod::AnthropicCache
            | PricingMethod::DeepseekCache
            | PricingMethod::GoogleCache
            | PricingMethod::GoogleImplicit
            | PricingMethod::GoogleExplicit
            | PricingMethod::BedrockCache => Some(0.10),
        }
    }
}

/// One concrete (provider, model) deployment with its routing attributes
#[derive(Debug, Clone, PartialEq)]
pub struct ModelVariant {
    /// Caller-facing model identifier (may contain `/`)
    pub model_id: String,
    /// Provider name
    pub provider: String,
    /// Identifier the upstream expects
    pub provider_model_id: String,
    /// Wire dialect
    pub adapter: AdapterKind,
    /// Upstream base URL
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_ref: String,
    /// Opaque extras forwarded to the adapter
    pub extra_params: Option<serde_json::Value>,
    /// Maximum input tokens, when known
    pub context_window: Option<u32>,
    /// Tool calling supported
    pub supports_tool_calling: bool,
    /// Vision input supported
    pub supports_vision: bool,
    /// Prompt caching supported
    pub supports_input_cache: bool,
    /// USD per 1000 input tokens
    pub price_per_input_token: f64,
    /// USD per 1000 output tokens
    pub price_per_output_token: f64,
    /// Pricing rule
    pub pricing_method: PricingMethod,
    /// Tokenizer for offline counting
    pub tokenizer_name: Option<String>,
}

impl ModelVariant {
    /// Build from a registry row; `None` when the adapter dialect is unknown
    pub fn from_entity(row: model::Model) -> Option<Self> {
        let Some(adapter) = AdapterKind::parse(&row.adapter) else {
            warn!(
                "Skipping variant ({}, {}): unknown adapter '{}'",
                row.model_id, row.provider, row.adapter
            );
            return None;
        };

        Some(Self {
            model_id: row.model_id,
            provider: row.provider,
            provider_model_id: row.provider_model_id,
            adapter,
            base_url: row.base_url,
            api_key_ref: row.api_key_ref,
            extra_params: row.extra_params,
            context_window: row.context_window.map(|c| c as u32),
            supports_tool_calling: row.supports_tool_calling,
            supports_vision: row.supports_vision,
            supports_input_cache: row.supports_input_cache,
            price_per_input_token: row.price_per_input_token,
            price_per_output_token: row.price_per_output_token,
            pricing_method: PricingMethod::parse(&row.pricing_method),
            tokenizer_name: row.tokenizer_name,
        })
    }

    /// Total price per 1000 tokens, input plus output side
    pub fn total_price(&self) -> f64 {
        self.price_per_input_token + self.price_per_output_token
    }
}

/// One score band of a family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRange {
    /// Inclusive lower bound
    pub min_score: u8,
    /// Inclusive upper bound
    pub max_score: u8,
    /// Concrete model routed to for this band
    pub target_model: String,
    /// Operator note surfaced in routing results
    #[serde(default)]
    pub reason: String,
}

impl ScoreRange {
    /// True when `score` falls inside this band
    pub fn contains(&self, score: u8) -> bool {
        score >= self.min_score && score <= self.max_score
    }
}

/// Family configuration: a synthetic model id resolved by an evaluator
#[derive(Debug, Clone)]
pub struct FamilyConfig {
    /// The family's caller-facing model id
    pub family_id: String,
    /// Cheap judge model
    pub evaluation_model_id: String,
    /// Provider of the judge model
    pub evaluation_provider: String,
    /// Ordered, non-overlapping score bands
    pub score_ranges: Vec<ScoreRange>,
    /// Model used when no band matches or evaluation fails
    pub fallback_model: String,
    /// Provider of the fallback model
    pub fallback_provider: String,
    /// Routing memo TTL in minutes
    pub cache_duration_minutes: u64,
    /// Judge call timeout in milliseconds
    pub evaluation_timeout_ms: u64,
    /// Disabled families reject requests
    pub enabled: bool,
}

impl FamilyConfig {
    /// Build from a registry row, validating the score bands
    pub fn from_entity(row: family::Model) -> Result<Self> {
        let score_ranges: Vec<ScoreRange> = serde_json::from_value(row.score_ranges)
            .map_err(|e| {
                GatewayError::Config(format!(
                    "family '{}': invalid score_ranges: {}",
                    row.family_id, e
                ))
            })?;

        let config = Self {
            family_id: row.family_id,
            evaluation_model_id: row.evaluation_model_id,
            evaluation_provider: row.evaluation_provider,
            score_ranges,
            fallback_model: row.fallback_model,
            fallback_provider: row.fallback_provider,
            cache_duration_minutes: row.cache_duration_minutes.max(0) as u64,
            evaluation_timeout_ms: row.evaluation_timeout_ms.max(0) as u64,
            enabled: row.enabled,
        };
        config.validate_ranges()?;
        Ok(config)
    }

    /// Reject overlapping bands; tolerate (but log) gaps in 1..=100
    pub fn validate_ranges(&self) -> Result<()> {
        let mut sorted: Vec<&ScoreRange> = self.score_ranges.iter().collect();
        sorted.sort_by_key(|r| r.min_score);

        for pair in sorted.windows(2) {
            if pair[1].min_score <= pair[0].max_score {
                return Err(GatewayError::Config(format!(
                    "family '{}': score ranges {}..={} and {}..={} overlap",
                    self.family_id,
                    pair[0].min_score,
                    pair[0].max_score,
                    pair[1].min_score,
                    pair[1].max_score
                )));
            }
        }

        let covered: u32 = sorted
            .iter()
            .map(|r| {
                let lo = r.min_score.clamp(1, 100) as u32;
                let hi = r.max_score.clamp(1, 100) as u32;
                hi.saturating_sub(lo) + 1
            })
            .sum();
        if covered < 100 {
            warn!(
                "family '{}': score ranges leave gaps in 1..=100; fallback model will serve them",
                self.family_id
            );
        }

        Ok(())
    }

    /// First band containing `score`
    pub fn range_for(&self, score: u8) -> Option<&ScoreRange> {
        self.score_ranges.iter().find(|r| r.contains(score))
    }
}
