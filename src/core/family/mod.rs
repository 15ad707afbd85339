//! Family router
//!
//! A "family" is a synthetic model id. At request time a cheap evaluator
//! model scores the conversation's complexity 1..=100 and the score band
//! picks the concrete model. Results are memoized in-process keyed by a
//! digest of the routing-relevant request fields, with the family's own TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::adapters::{AdapterFactory, UpstreamResponse};
use crate::core::catalog::{FamilyConfig, ModelCatalog, ModelVariant};
use crate::core::types::{
    ChatCompletion, ChatCompletionRequest, ChatMessage, MessageContent, MessageRole,
};
use crate::utils::error::{GatewayError, Result};
use crate::utils::text::truncate_middle;

/// Evaluation prompt budget: characters per token estimate is 4
const EVALUATION_TOKEN_BUDGET: u32 = 128_000;
/// Per-message share of the evaluation budget
const MAX_TOKENS_PER_MESSAGE: u32 = 4000;
/// Charged when the evaluator variant has no catalog pricing
const FALLBACK_EVALUATION_COST: f64 = 0.0001;

const EVALUATION_SYSTEM_PROMPT: &str = "You judge the difficulty of the assistant's next action \
in a conversation. Reply with a single integer from 1 (trivial) to 100 (extremely complex). \
No words, no punctuation, only the integer.";

const COMPRESSION_SYSTEM_PROMPT: &str = "You shorten conversations. Given a numbered list of \
messages, reply with a JSON array of the indices that can be removed without losing meaning \
(redundant acknowledgements, small talk). Never remove the first message or the last three. \
Reply with the JSON array only.";

/// Outcome of routing one request through a family
#[derive(Debug, Clone)]
pub struct RoutingResult {
    /// Concrete model to run
    pub selected_model: String,
    /// Provider pinned by the family config, when any (fallback only)
    pub selected_provider: Option<String>,
    /// Evaluator's complexity score, clamped to 1..=100
    pub complexity_score: u8,
    /// Why this model was chosen
    pub reasoning: String,
    /// Cost of the evaluator call in USD
    pub evaluation_cost: f64,
    /// Tokens spent on the evaluator call
    pub evaluation_tokens: u32,
    /// True when served from the memo without an evaluator call
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
struct MemoEntry {
    result: RoutingResult,
    ttl: Duration,
}

struct MemoExpiry;

impl Expiry<String, MemoEntry> for MemoExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Non-streaming evaluator invocation, separated so tests can stub the model
#[async_trait]
pub trait EvaluationClient: Send + Sync {
    /// Run one non-streaming completion against the given variant
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        variant: &ModelVariant,
        timeout: Duration,
    ) -> Result<ChatCompletion>;
}

/// Production evaluation client backed by the adapter factory
pub struct AdapterEvaluationClient {
    factory: AdapterFactory,
}

impl AdapterEvaluationClient {
    /// Wrap the shared adapter factory
    pub fn new(factory: AdapterFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl EvaluationClient for AdapterEvaluationClient {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        variant: &ModelVariant,
        timeout: Duration,
    ) -> Result<ChatCompletion> {
        let adapter = self.factory.create(variant.adapter);
        let response = tokio::time::timeout(timeout, adapter.make_request(request, variant, false))
            .await
            .map_err(|_| {
                GatewayError::Timeout(format!(
                    "evaluator {} did not answer within {}ms",
                    variant.model_id,
                    timeout.as_millis()
                ))
            })??;

        match response {
            UpstreamResponse::Full(completion) => Ok(completion),
            UpstreamResponse::Stream(_) => Err(GatewayError::Internal(
                "evaluator returned a stream for a non-streaming call".to_string(),
            )),
        }
    }
}

/// Evaluator-driven model substitution for family ids
pub struct FamilyRouter {
    catalog: Arc<ModelCatalog>,
    client: Arc<dyn EvaluationClient>,
    memo: moka::future::Cache<String, MemoEntry>,
}

impl FamilyRouter {
    /// Create over the catalog and an evaluation client
    pub fn new(catalog: Arc<ModelCatalog>, client: Arc<dyn EvaluationClient>) -> Self {
        let memo = moka::future::Cache::builder()
            .max_capacity(10_000)
            .expire_after(MemoExpiry)
            .build();
        Self {
            catalog,
            client,
            memo,
        }
    }

    /// Resolve a family id into a concrete model for this request
    pub async fn evaluate_and_route(
        &self,
        family_id: &str,
        request: &ChatCompletionRequest,
    ) -> Result<RoutingResult> {
        let family = self
            .catalog
            .family_for(family_id)
            .await?
            .ok_or_else(|| GatewayError::Validation(format!("unknown model '{}'", family_id)))?;
        if !family.enabled {
            return Err(GatewayError::Validation(format!(
                "model '{}' is disabled",
                family_id
            )));
        }

        let key = memo_key(family_id, request);
        if let Some(entry) = self.memo.get(&key).await {
            debug!("Family {} served from routing memo", family_id);
            let mut result = entry.result;
            result.from_cache = true;
            return Ok(result);
        }

        let result = self.evaluate(&family, request).await;
        self.memo
            .insert(
                key,
                MemoEntry {
                    result: result.clone(),
                    ttl: Duration::from_secs(family.cache_duration_minutes * 60),
                },
            )
            .await;

        Ok(result)
    }

    /// Run the evaluator and map its score onto a band.
    ///
    /// Never fails the user request: every failure path degrades to the
    /// family's fallback model.
    async fn evaluate(
        &self,
        family: &FamilyConfig,
        request: &ChatCompletionRequest,
    ) -> RoutingResult {
        let mut messages = request.messages.clone();
        if request.compression.unwrap_or(false) {
            messages = self.compress_messages(family, messages).await;
        }
        let conversation = truncate_conversation(&messages);

        let eval_request = ChatCompletionRequest {
            model: family.evaluation_model_id.clone(),
            messages: vec![
                ChatMessage {
                    role: MessageRole::System,
                    content: Some(MessageContent::Text(EVALUATION_SYSTEM_PROMPT.to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
                ChatMessage {
                    role: MessageRole::User,
                    content: Some(MessageContent::Text(conversation)),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
            ],
            temperature: Some(0.0),
            top_p: None,
            max_tokens: Some(10),
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
        };

        let variant = match self
            .catalog
            .variant(&family.evaluation_model_id, &family.evaluation_provider)
            .await
        {
            Ok(Some(v)) => v,
            _ => {
                warn!(
                    "Family {}: evaluator variant ({}, {}) not in catalog, using fallback",
                    family.family_id, family.evaluation_model_id, family.evaluation_provider
                );
                return fallback_result(family, 50, "evaluator unavailable");
            }
        };

        let timeout = Duration::from_millis(family.evaluation_timeout_ms);
        let completion = match self.client.complete(&eval_request, &variant, timeout).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Family {}: evaluation failed: {}", family.family_id, e);
                return fallback_result(family, 50, "evaluation failed");
            }
        };

        let answer = completion.choices.first().and_then(|c| c.message.content.as_deref());
        let score = parse_score(answer.unwrap_or_default());

        let (evaluation_cost, evaluation_tokens) = evaluation_cost(&completion, &variant);

        match family.range_for(score) {
            Some(range) => RoutingResult {
                selected_model: range.target_model.clone(),
                selected_provider: None,
                complexity_score: score,
                reasoning: if range.reason.is_empty() {
                    format!("complexity {} in {}..={}", score, range.min_score, range.max_score)
                } else {
                    range.reason.clone()
                },
                evaluation_cost,
                evaluation_tokens,
                from_cache: false,
            },
            None => {
                let mut result = fallback_result(family, score, "no matching range");
                result.evaluation_cost = evaluation_cost;
                result.evaluation_tokens = evaluation_tokens;
                result
            }
        }
    }

    /// Best-effort conversation compression through the evaluator variant.
    ///
    /// Any failure leaves the messages untouched.
    async fn compress_messages(
        &self,
        family: &FamilyConfig,
        messages: Vec<ChatMessage>,
    ) -> Vec<ChatMessage> {
        // Nothing to gain below first + last three
        if messages.len() <= 4 {
            return messages;
        }

        let variant = match self
            .catalog
            .variant(&family.evaluation_model_id, &family.evaluation_provider)
            .await
        {
            Ok(Some(v)) => v,
            _ => return messages,
        };

        let listing = messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                format!(
                    "{}. [{}] {}",
                    i,
                    m.role,
                    truncate_middle(&m.text_content(), 400)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let compress_request = ChatCompletionRequest {
            model: family.evaluation_model_id.clone(),
            messages: vec![
                ChatMessage {
                    role: MessageRole::System,
                    content: Some(MessageContent::Text(COMPRESSION_SYSTEM_PROMPT.to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
                ChatMessage {
                    role: MessageRole::User,
                    content: Some(MessageContent::Text(listing)),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
            ],
            temperature: Some(0.0),
            top_p: None,
            max_tokens: Some(100),
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
        };

        let timeout = Duration::from_millis(family.evaluation_timeout_ms);
        let Ok(completion) = self.client.complete(&compress_request, &variant, timeout).await
        else {
            return messages;
        };

        let Some(text) = completion
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
        else {
            return messages;
        };

        let Ok(indices) = serde_json::from_str::<Vec<usize>>(text.trim()) else {
            return messages;
        };

        let protected_tail = messages.len().saturating_sub(3);
        messages
            .into_iter()
            .enumerate()
            .filter(|(i, _)| {
                *i == 0 || *i >= protected_tail || !indices.contains(i)
            })
            .map(|(_, m)| m)
            .collect()
    }
}

/// Compose the fallback routing result
fn fallback_result(family: &FamilyConfig, score: u8, reason: &str) -> RoutingResult {
    RoutingResult {
        selected_model: family.fallback_model.clone(),
        selected_provider: Some(family.fallback_provider.clone()),
        complexity_score: score,
        reasoning: reason.to_string(),
        evaluation_cost: 0.0,
        evaluation_tokens: 0,
        from_cache: false,
    }
}

/// Digest of the routing-relevant request fields
fn memo_key(family_id: &str, request: &ChatCompletionRequest) -> String {
    let fingerprint = json!({
        "family": family_id,
        "messages": request.messages,
        "tools": request.tools,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    });
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// JSON-encode the conversation within the evaluation budget.
///
/// Each message's text is middle-truncated so the total stays near
/// `min(128000, MAX_TOKENS_PER_MESSAGE * count)` tokens.
fn truncate_conversation(messages: &[ChatMessage]) -> String {
    let count = messages.len().max(1) as u32;
    let total_budget = EVALUATION_TOKEN_BUDGET.min(MAX_TOKENS_PER_MESSAGE * count);
    let per_message_chars = (total_budget / count * 4) as usize;

    let entries: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            json!({
                "role": m.role.to_string(),
                "content": truncate_middle(&m.text_content(), per_message_chars),
            })
        })
        .collect();

    json!(entries).to_string()
}

/// Parse the evaluator's answer; clamp to 1..=100, 50 on garbage
fn parse_score(answer: &str) -> u8 {
    let trimmed = answer.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return n.clamp(1, 100) as u8;
    }

    // Tolerate prose around the number ("Complexity: 42")
    let digits: String = trimmed
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse::<i64>()
        .map(|n| n.clamp(1, 100) as u8)
        .unwrap_or(50)
}

/// Evaluator cost: upstream-reported when available, catalog pricing
/// otherwise, a fixed pittance when neither exists
fn evaluation_cost(completion: &ChatCompletion, variant: &ModelVariant) -> (f64, u32) {
    let Some(usage) = &completion.usage else {
        return (FALLBACK_EVALUATION_COST, 0);
    };
    let tokens = usage.total_tokens;

    if let Some(cost) = usage.cost {
        return (cost, tokens);
    }

    if variant.price_per_input_token > 0.0 || variant.price_per_output_token > 0.0 {
        let cost = f64::from(usage.prompt_tokens) * variant.price_per_input_token / 1000.0
            + f64::from(usage.completion_tokens) * variant.price_per_output_token / 1000.0;
        return (cost, tokens);
    }

    (FALLBACK_EVALUATION_COST, tokens)
}
