//! Adapter contract
//!
//! An adapter is a configuration bundle plus a set of transforms for one
//! upstream wire dialect; the only runtime state is the injected HTTP
//! client. Adapters translate the gateway's standardized request into the
//! upstream format, drive the connection (plain or streaming), normalize the
//! response, and classify failures into business vs transient.

pub mod anthropic;
pub mod openai;
pub mod sse;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::config::UpstreamConfig;
use crate::core::catalog::{AdapterKind, ModelVariant};
use crate::core::types::{ChatCompletion, ChatCompletionChunk, ChatCompletionRequest};
use crate::utils::error::GatewayError;

/// Failure category reported by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request; the caller's fault
    InvalidRequest,
    /// Credential rejected; a configuration problem of this variant
    Auth,
    /// Upstream rate limit
    RateLimit,
    /// Upstream 5xx or malformed upstream behavior
    Upstream,
    /// Transport-level failure
    Network,
    /// Deadline exceeded
    Timeout,
    /// Upstream payload could not be parsed
    Parse,
}

/// Classified adapter failure
#[derive(Debug, Clone, Error)]
#[error("{provider}: {message}")]
pub struct AdapterError {
    /// Provider that failed
    pub provider: String,
    /// Failure category
    pub kind: ErrorKind,
    /// Upstream HTTP status, when one was received
    pub status: Option<u16>,
    /// Human-readable message
    pub message: String,
}

impl AdapterError {
    /// Classify an upstream HTTP status into a failure category.
    ///
    /// Credential and rate-limit responses are configuration problems of the
    /// tried variant, not of the caller, so they stay transient and allow
    /// fallback; the remaining 4xx statuses are the caller's fault.
    pub fn classify_status(status: u16) -> ErrorKind {
        match status {
            401 | 403 => ErrorKind::Auth,
            408 => ErrorKind::Timeout,
            429 => ErrorKind::RateLimit,
            s if (400..500).contains(&s) => ErrorKind::InvalidRequest,
            _ => ErrorKind::Upstream,
        }
    }

    /// True when the failure is the caller's fault and must not trigger
    /// fallback
    pub fn is_business(&self) -> bool {
        self.kind == ErrorKind::InvalidRequest
    }

    /// Build from an upstream error response
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        // Upstreams wrap messages differently; try the OpenAI shape first
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .or_else(|| v.pointer("/message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| body.chars().take(500).collect());

        Self {
            provider: provider.to_string(),
            kind: Self::classify_status(status),
            status: Some(status),
            message,
        }
    }

    pub fn network(provider: &str, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind: ErrorKind::Network,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(provider: &str, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind: ErrorKind::Timeout,
            status: None,
            message: message.into(),
        }
    }

    pub fn parse(provider: &str, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind: ErrorKind::Parse,
            status: None,
            message: message.into(),
        }
    }
}

impl From<AdapterError> for GatewayError {
    fn from(e: AdapterError) -> Self {
        GatewayError::Upstream {
            business: e.is_business(),
            provider: e.provider,
            status: e.status.unwrap_or(0),
            message: e.message,
        }
    }
}

/// Normalized chunk stream produced by a streaming upstream call
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = std::result::Result<ChatCompletionChunk, AdapterError>> + Send>>;

/// Either a full response or a chunk stream
pub enum UpstreamResponse {
    /// Non-streaming result
    Full(ChatCompletion),
    /// Streaming result; ends at upstream `[DONE]` or stream end
    Stream(ChunkStream),
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamResponse::Full(completion) => {
                f.debug_tuple("Full").field(completion).finish()
            }
            UpstreamResponse::Stream(_) => f.debug_tuple("Stream").field(&"<stream>").finish(),
        }
    }
}

/// Mutable per-request state threaded through `transform_stream_chunk`.
///
/// The OpenAI dialect is stateless; the Anthropic dialect accumulates the
/// message id and usage across events and synthesizes the final usage chunk.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Upstream message/completion id
    pub message_id: String,
    /// Model echoed by the upstream
    pub model: String,
    /// Input tokens reported at stream start (Anthropic)
    pub input_tokens: u32,
    /// Cached input tokens reported at stream start
    pub cached_tokens: Option<u32>,
    /// Output tokens accumulated from delta events
    pub output_tokens: u32,
    /// Finish reason captured before the terminal event
    pub finish_reason: Option<String>,
}

/// One upstream wire dialect
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Dialect spoken
    fn kind(&self) -> AdapterKind;

    /// True when the variant's credential is resolvable from the environment
    fn is_configured(&self, variant: &ModelVariant) -> bool {
        std::env::var(&variant.api_key_ref).is_ok_and(|v| !v.is_empty())
    }

    /// Cheap pre-flight check; a false skips the candidate without an error
    fn validate_request(&self, request: &ChatCompletionRequest, variant: &ModelVariant) -> bool;

    /// Standardized request -> upstream JSON body
    fn transform_request(
        &self,
        request: &ChatCompletionRequest,
        variant: &ModelVariant,
        streaming: bool,
    ) -> Result<serde_json::Value, AdapterError>;

    /// Upstream JSON body -> normalized completion
    fn transform_response(
        &self,
        body: serde_json::Value,
        variant: &ModelVariant,
    ) -> Result<ChatCompletion, AdapterError>;

    /// One SSE data line -> zero or one normalized chunk.
    ///
    /// Returning `Ok(None)` skips the line (comments, pings, `[DONE]`).
    fn transform_stream_chunk(
        &self,
        line: &str,
        state: &mut StreamState,
        variant: &ModelVariant,
    ) -> Result<Option<ChatCompletionChunk>, AdapterError>;

    /// Request headers, including the resolved credential.
    ///
    /// The secret is read from the environment at request time and never
    /// stored on the adapter.
    fn build_headers(&self, variant: &ModelVariant) -> Result<HeaderMap, AdapterError>;

    /// Full URL of the chat endpoint for this variant
    fn endpoint(&self, variant: &ModelVariant) -> String;

    /// Borrow the injected HTTP client
    fn http_client(&self) -> &reqwest::Client;

    /// Timeout budget for non-streaming calls
    fn request_timeout(&self) -> Duration;

    /// Idle budget between streaming chunks
    fn stream_idle_timeout(&self) -> Duration;

    /// Execute the request against the upstream.
    ///
    /// Non-streaming: returns the normalized full response. Streaming:
    /// returns a chunk stream; errors after the HTTP exchange started
    /// surface as stream items.
    async fn make_request(
        self: Arc<Self>,
        request: &ChatCompletionRequest,
        variant: &ModelVariant,
        streaming: bool,
    ) -> Result<UpstreamResponse, AdapterError> {
        let provider = variant.provider.clone();
        let body = self.transform_request(request, variant, streaming)?;
        let headers = self.build_headers(variant)?;
        let url = self.endpoint(variant);

        let mut builder = self.http_client().post(&url).headers(headers).json(&body);
        if !streaming {
            builder = builder.timeout(self.request_timeout());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AdapterError::timeout(&provider, format!("request timed out: {}", e))
            } else {
                AdapterError::network(&provider, format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(&provider, status.as_u16(), &text));
        }

        if !streaming {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| AdapterError::parse(&provider, format!("invalid JSON: {}", e)))?;
            return Ok(UpstreamResponse::Full(self.transform_response(json, variant)?));
        }

        let variant = variant.clone();
        let idle = self.stream_idle_timeout();
        let adapter = self;
        let stream = async_stream::stream! {
            let mut lines = Box::pin(sse::sse_lines(response, idle, variant.provider.clone()));
            let mut state = StreamState::default();

            while let Some(line) = futures::StreamExt::next(&mut lines).await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                match adapter.transform_stream_chunk(&line, &mut state, &variant) {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => continue,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(UpstreamResponse::Stream(Box::pin(stream)))
    }
}

/// Builds adapter instances around one shared HTTP client
#[derive(Clone)]
pub struct AdapterFactory {
    client: reqwest::Client,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl AdapterFactory {
    /// Create the factory and its HTTP client.
    ///
    /// The client carries no total timeout; non-streaming calls set one per
    /// request, streaming calls bound inter-chunk idle time instead.
    pub fn new(config: &UpstreamConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                GatewayError::Config(format!("failed to build upstream HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    /// Adapter for one wire dialect
    pub fn create(&self, kind: AdapterKind) -> Arc<dyn Adapter> {
        match kind {
            AdapterKind::OpenAi => Arc::new(OpenAiAdapter::new(
                self.client.clone(),
                self.request_timeout,
                self.stream_idle_timeout,
            )),
            AdapterKind::Anthropic => Arc::new(AnthropicAdapter::new(
                self.client.clone(),
                self.request_timeout,
                self.stream_idle_timeout,
            )),
        }
    }
}

/// Source of adapter instances
///
/// The orchestrator resolves adapters through this seam; tests substitute
/// scripted adapters.
pub trait AdapterSource: Send + Sync {
    /// Adapter for one wire dialect
    fn create(&self, kind: AdapterKind) -> Arc<dyn Adapter>;
}

impl AdapterSource for AdapterFactory {
    fn create(&self, kind: AdapterKind) -> Arc<dyn Adapter> {
        AdapterFactory::create(self, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(AdapterError::classify_status(400), ErrorKind::InvalidRequest);
        assert_eq!(AdapterError::classify_status(401), ErrorKind::Auth);
        assert_eq!(AdapterError::classify_status(404), ErrorKind::InvalidRequest);
        assert_eq!(AdapterError::classify_status(429), ErrorKind::RateLimit);
        assert_eq!(AdapterError::classify_status(500), ErrorKind::Upstream);
        assert_eq!(AdapterError::classify_status(503), ErrorKind::Upstream);
    }

    #[test]
    fn only_invalid_request_is_business() {
        let business = AdapterError::from_status("openai", 422, "{}");
        assert!(business.is_business());

        let auth = AdapterError::from_status("openai", 401, "{}");
        assert!(!auth.is_business());

        let overload = AdapterError::from_status("openai", 503, "{}");
        assert!(!overload.is_business());
    }

    #[test]
    fn upstream_message_is_extracted_from_openai_shape() {
        let e = AdapterError::from_status(
            "openai",
            400,
            r#"{"error":{"message":"bad temperature","type":"invalid_request_error"}}"#,
        );
        assert_eq!(e.message, "bad temperature");
    }
}
