//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use modelmux::core::catalog::{AdapterKind, ModelCatalog, ModelVariant, PricingMethod};
use modelmux::core::metrics::{MetricsSource, ProviderMetrics};
use modelmux::core::selector::ProviderSelector;
use modelmux::core::types::{
    ChatCompletionRequest, ChatMessage, MessageContent, MessageRole,
};
use uuid::Uuid;

/// A variant with sane defaults; prices are USD per 1000 tokens
pub fn variant(model_id: &str, provider: &str, price_in: f64, price_out: f64) -> ModelVariant {
    ModelVariant {
        model_id: model_id.to_string(),
        provider: provider.to_string(),
        provider_model_id: model_id.to_string(),
        adapter: AdapterKind::OpenAi,
        base_url: "https://api.example.com/v1".to_string(),
        api_key_ref: "EXAMPLE_API_KEY".to_string(),
        extra_params: None,
        context_window: Some(128_000),
        supports_tool_calling: true,
        supports_vision: true,
        supports_input_cache: false,
        price_per_input_token: price_in,
        price_per_output_token: price_out,
        pricing_method: PricingMethod::Standard,
        tokenizer_name: Some("cl100k_base".to_string()),
    }
}

/// A single-user chat request
pub fn chat_request(model: &str, text: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: MessageRole::User,
            content: Some(MessageContent::Text(text.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }],
        temperature: None,
        top_p: None,
        max_tokens: None,
        stream: None,
        stream_options: None,
        stop: None,
        presence_penalty: None,
        frequency_penalty: None,
        tools: None,
        tool_choice: None,
        provider: None,
        compression: None,
        user: None,
    }
}

/// Metrics source backed by fixed maps
pub struct StaticMetrics {
    pub metrics: HashMap<String, ProviderMetrics>,
    pub history: HashMap<String, bool>,
}

impl StaticMetrics {
    pub fn empty() -> Self {
        Self {
            metrics: HashMap::new(),
            history: HashMap::new(),
        }
    }

    pub fn with_history(provider: &str) -> Self {
        Self {
            metrics: HashMap::new(),
            history: HashMap::from([(provider.to_string(), true)]),
        }
    }
}

#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn provider_metrics_batch(
        &self,
        _model_id: &str,
        providers: &[String],
        _window_size: u32,
    ) -> modelmux::Result<HashMap<String, ProviderMetrics>> {
        Ok(providers
            .iter()
            .map(|p| (p.clone(), self.metrics.get(p).copied().unwrap_or_default()))
            .collect())
    }

    async fn user_cache_history_batch(
        &self,
        _user_id: Uuid,
        _model_id: &str,
        providers: &[String],
    ) -> modelmux::Result<HashMap<String, bool>> {
        Ok(providers
            .iter()
            .map(|p| (p.clone(), self.history.get(p).copied().unwrap_or(false)))
            .collect())
    }
}

/// Selector over a static catalog and fixed metrics
pub fn selector(variants: Vec<ModelVariant>, metrics: StaticMetrics) -> ProviderSelector {
    ProviderSelector::new(
        Arc::new(ModelCatalog::with_static(variants, vec![])),
        Arc::new(metrics),
    )
}
