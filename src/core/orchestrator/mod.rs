//! Request orchestrator
//!
//! Drives one chat completion end to end: validation, family substitution,
//! candidate selection, the fallback loop, the streaming pump, and
//! background persistence of the served request.
//!
//! Fallback semantics: candidates are attempted strictly in selector order.
//! A business error stops the loop and surfaces to the caller; a transient
//! error fires a notification and moves on. For streams the candidate is
//! committed once its first chunk has been forwarded; later errors terminate
//! the caller's stream instead of restarting on a new upstream.

pub mod reconstruct;
pub mod sink;

pub use reconstruct::ResponseAccumulator;
pub use sink::{RequestIdentity, RequestSink, ServedRequest, SqlRequestSink, StreamTimings};

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::adapters::{AdapterSource, ChunkStream, UpstreamResponse};
use crate::core::catalog::ModelCatalog;
use crate::core::family::FamilyRouter;
use crate::core::notify::{Notification, Notifier};
use crate::core::selector::{Candidate, ProviderSelector, SelectionOptions};
use crate::core::types::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage,
};
use crate::utils::error::{GatewayError, Result};
use sink::persist_in_background;

/// Result of one orchestrated chat completion
pub enum ChatOutcome {
    /// Non-streaming response
    Full(ChatCompletion),
    /// Streamed response; the stream ends when the upstream finishes or
    /// fails mid-flight
    Stream(ReceiverStream<ChatCompletionChunk>),
}

impl std::fmt::Debug for ChatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatOutcome::Full(completion) => f.debug_tuple("Full").field(completion).finish(),
            ChatOutcome::Stream(_) => f.debug_tuple("Stream").field(&"<stream>").finish(),
        }
    }
}

/// End-to-end request driver
pub struct Orchestrator {
    catalog: Arc<ModelCatalog>,
    selector: Arc<ProviderSelector>,
    family: Arc<FamilyRouter>,
    adapters: Arc<dyn AdapterSource>,
    sink: Arc<dyn RequestSink>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    /// Wire up the pipeline
    pub fn new(
        catalog: Arc<ModelCatalog>,
        selector: Arc<ProviderSelector>,
        family: Arc<FamilyRouter>,
        adapters: Arc<dyn AdapterSource>,
        sink: Arc<dyn RequestSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            catalog,
            selector,
            family,
            adapters,
            sink,
            notifier,
        }
    }

    /// Serve one chat completion request
    pub async fn handle_chat_completion(
        &self,
        mut request: ChatCompletionRequest,
        identity: RequestIdentity,
        options: SelectionOptions,
    ) -> Result<ChatOutcome> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        validate_request(&request)?;

        // Family ids resolve to a concrete model before selection; the
        // evaluator's cost rides on this request's record
        let mut evaluation_cost = None;
        if self.catalog.family_for(&request.model).await?.is_some() {
            let routing = self.family.evaluate_and_route(&request.model, &request).await?;
            info!(
                "Family {} -> {} (score {}, {}{})",
                request.model,
                routing.selected_model,
                routing.complexity_score,
                routing.reasoning,
                if routing.from_cache { ", memoized" } else { "" }
            );
            request.model = routing.selected_model.clone();
            if !routing.from_cache {
                evaluation_cost = Some(routing.evaluation_cost);
            }
        }

        let candidates = self
            .selector
            .filter_providers(&request, identity.user_id, &options)
            .await?;

        let streaming = request.stream.unwrap_or(false);
        if streaming {
            self.execute_streaming(request, identity, candidates, request_id, evaluation_cost, started)
                .await
        } else {
            self.execute_plain(request, identity, candidates, request_id, evaluation_cost, started)
                .await
        }
    }

    /// Non-streaming fallback loop
    async fn execute_plain(
        &self,
        request: ChatCompletionRequest,
        identity: RequestIdentity,
        candidates: Vec<Candidate>,
        request_id: Uuid,
        evaluation_cost: Option<f64>,
        started: Instant,
    ) -> Result<ChatOutcome> {
        let mut last_error: Option<GatewayError> = None;
        let mut skipped: Vec<String> = Vec::new();

        for candidate in &candidates {
            let variant = &candidate.variant;
            let adapter = self.adapters.create(variant.adapter);

            if !adapter.is_configured(variant) {
                debug!("Skipping {}: credential not configured", variant.provider);
                skipped.push(format!("{}: credential not configured", variant.provider));
                continue;
            }
            if !adapter.validate_request(&request, variant) {
                debug!("Skipping {}: request rejected by adapter", variant.provider);
                skipped.push(format!("{}: request rejected by adapter", variant.provider));
                continue;
            }

            match adapter.make_request(&request, variant, false).await {
                Ok(UpstreamResponse::Full(completion)) => {
                    info!(
                        "Served {} via {} in {}ms",
                        request.model,
                        variant.provider,
                        started.elapsed().as_millis()
                    );
                    persist_in_background(
                        self.sink.clone(),
                        ServedRequest {
                            request_id,
                            identity,
                            provider: variant.provider.clone(),
                            model_id: request.model.clone(),
                            streaming: false,
                            status: crate::storage::entities::request::status::READY_TO_COMPUTE,
                            request_body: serde_json::to_value(&request)?,
                            response_body: Some(serde_json::to_value(&completion)?),
                            usage: completion.usage.clone(),
                            error_message: None,
                            evaluation_cost,
                            timings: None,
                        },
                    );
                    return Ok(ChatOutcome::Full(completion));
                }
                Ok(UpstreamResponse::Stream(_)) => {
                    warn!("{} returned a stream for a plain call", variant.provider);
                    last_error = Some(GatewayError::Internal(
                        "adapter returned a stream for a non-streaming call".to_string(),
                    ));
                }
                Err(e) if e.is_business() => {
                    let err: GatewayError = e.into();
                    self.persist_failure(&request, &identity, request_id, variant.provider.clone(), false, evaluation_cost, &err);
                    return Err(err);
                }
                Err(e) => {
                    self.notifier.notify(Notification::new(
                        &variant.provider,
                        &request.model,
                        request_id,
                        &e.message,
                    ));
                    last_error = Some(e.into());
                }
            }
        }

        let err = exhausted_error(&request.model, last_error, skipped);
        self.persist_failure(&request, &identity, request_id, String::new(), false, evaluation_cost, &err);
        Err(err)
    }

    /// Streaming fallback loop.
    ///
    /// The first chunk of each attempted candidate is awaited before
    /// committing: failures up to that point fall back exactly like the
    /// non-streaming path and keep their HTTP status.
    async fn execute_streaming(
        &self,
        request: ChatCompletionRequest,
        identity: RequestIdentity,
        candidates: Vec<Candidate>,
        request_id: Uuid,
        evaluation_cost: Option<f64>,
        started: Instant,
    ) -> Result<ChatOutcome> {
        let mut last_error: Option<GatewayError> = None;
        let mut skipped: Vec<String> = Vec::new();

        for candidate in &candidates {
            let variant = &candidate.variant;
            let adapter = self.adapters.create(variant.adapter);

            if !adapter.is_configured(variant) {
                skipped.push(format!("{}: credential not configured", variant.provider));
                continue;
            }
            if !adapter.validate_request(&request, variant) {
                skipped.push(format!("{}: request rejected by adapter", variant.provider));
                continue;
            }

            let mut upstream = match adapter.make_request(&request, variant, true).await {
                Ok(UpstreamResponse::Stream(s)) => s,
                Ok(UpstreamResponse::Full(_)) => {
                    warn!("{} returned a plain response for a stream", variant.provider);
                    last_error = Some(GatewayError::Internal(
                        "adapter returned a plain response for a streaming call".to_string(),
                    ));
                    continue;
                }
                Err(e) if e.is_business() => {
                    let err: GatewayError = e.into();
                    self.persist_failure(&request, &identity, request_id, variant.provider.clone(), true, evaluation_cost, &err);
                    return Err(err);
                }
                Err(e) => {
                    self.notifier.notify(Notification::new(
                        &variant.provider,
                        &request.model,
                        request_id,
                        &e.message,
                    ));
                    last_error = Some(e.into());
                    continue;
                }
            };

            // Commit only once the first chunk arrives
            match upstream.next().await {
                Some(Ok(first)) => {
                    info!(
                        "Streaming {} via {} (first chunk after {}ms)",
                        request.model,
                        variant.provider,
                        started.elapsed().as_millis()
                    );
                    let stream = self.pump(
                        first,
                        upstream,
                        request.clone(),
                        identity,
                        variant.provider.clone(),
                        request_id,
                        evaluation_cost,
                        started,
                    );
                    return Ok(ChatOutcome::Stream(stream));
                }
                Some(Err(e)) if e.is_business() => {
                    let err: GatewayError = e.into();
                    self.persist_failure(&request, &identity, request_id, variant.provider.clone(), true, evaluation_cost, &err);
                    return Err(err);
                }
                Some(Err(e)) => {
                    self.notifier.notify(Notification::new(
                        &variant.provider,
                        &request.model,
                        request_id,
                        &e.message,
                    ));
                    last_error = Some(e.into());
                }
                None => {
                    self.notifier.notify(Notification::new(
                        &variant.provider,
                        &request.model,
                        request_id,
                        "stream ended before the first chunk",
                    ));
                    last_error = Some(GatewayError::Upstream {
                        provider: variant.provider.clone(),
                        status: 0,
                        message: "stream ended before the first chunk".to_string(),
                        business: false,
                    });
                }
            }
        }

        let err = exhausted_error(&request.model, last_error, skipped);
        self.persist_failure(&request, &identity, request_id, String::new(), true, evaluation_cost, &err);
        Err(err)
    }

    /// Forward chunks to the caller while folding a copy for persistence.
    ///
    /// Runs detached so the record is written even when the caller
    /// disconnects; a mid-stream upstream error ends the caller's stream and
    /// the partial response is persisted as ready-to-compute.
    #[allow(clippy::too_many_arguments)]
    fn pump(
        &self,
        first: ChatCompletionChunk,
        mut upstream: ChunkStream,
        request: ChatCompletionRequest,
        identity: RequestIdentity,
        provider: String,
        request_id: Uuid,
        evaluation_cost: Option<f64>,
        started: Instant,
    ) -> ReceiverStream<ChatCompletionChunk> {
        let (tx, rx) = mpsc::channel(64);
        let sink = self.sink.clone();
        let time_to_first_chunk_ms = started.elapsed().as_millis() as i64;

        tokio::spawn(async move {
            let first_chunk_at = Instant::now();
            let mut last_chunk_at = first_chunk_at;
            let mut accumulator = ResponseAccumulator::new();

            accumulator.push(&first);
            let mut client_gone = tx.send(first).await.is_err();

            while let Some(item) = upstream.next().await {
                match item {
                    Ok(chunk) => {
                        accumulator.push(&chunk);
                        last_chunk_at = Instant::now();
                        if !client_gone {
                            client_gone = tx.send(chunk).await.is_err();
                        }
                    }
                    Err(e) => {
                        // Committed candidate: no fallback, terminate the
                        // caller's stream and keep the partial output
                        error!(
                            "Stream from {} failed after {} chunks: {}",
                            provider,
                            accumulator.chunks_seen(),
                            e
                        );
                        break;
                    }
                }
                if client_gone {
                    warn!("Client left during stream {}, aborting upstream", request_id);
                    break;
                }
            }
            drop(tx);

            let timings = StreamTimings {
                total_duration_ms: started.elapsed().as_millis() as i64,
                time_to_first_chunk_ms,
                dt_first_last_chunk_ms: last_chunk_at
                    .duration_since(first_chunk_at)
                    .as_millis() as i64,
            };

            let completion = accumulator.build(&provider);
            let served = ServedRequest {
                request_id,
                identity,
                provider,
                model_id: request.model.clone(),
                streaming: true,
                status: crate::storage::entities::request::status::READY_TO_COMPUTE,
                request_body: match serde_json::to_value(&request) {
                    Ok(v) => v,
                    Err(e) => {
                        error!("Failed to serialize request {}: {}", request_id, e);
                        return;
                    }
                },
                response_body: serde_json::to_value(&completion).ok(),
                usage: accumulator.usage().cloned(),
                error_message: None,
                evaluation_cost,
                timings: Some(timings),
            };
            if let Err(e) = sink.persist(served).await {
                error!("Failed to persist stream {}: {}", request_id, e);
            }
        });

        ReceiverStream::new(rx)
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_failure(
        &self,
        request: &ChatCompletionRequest,
        identity: &RequestIdentity,
        request_id: Uuid,
        provider: String,
        streaming: bool,
        evaluation_cost: Option<f64>,
        err: &GatewayError,
    ) {
        let request_body = match serde_json::to_value(request) {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to serialize failed request {}: {}", request_id, e);
                return;
            }
        };
        persist_in_background(
            self.sink.clone(),
            ServedRequest {
                request_id,
                identity: identity.clone(),
                provider,
                model_id: request.model.clone(),
                streaming,
                status: crate::storage::entities::request::status::ERROR,
                request_body,
                response_body: None,
                usage: None,
                error_message: Some(err.to_string()),
                evaluation_cost,
                timings: None,
            },
        );
    }
}

/// Error returned when no candidate could serve the request
fn exhausted_error(
    model: &str,
    last_error: Option<GatewayError>,
    skipped: Vec<String>,
) -> GatewayError {
    match last_error {
        Some(e) => e,
        None => GatewayError::NoCandidates {
            model: model.to_string(),
            diagnostics: if skipped.is_empty() {
                vec!["no candidates available".to_string()]
            } else {
                skipped
            },
        },
    }
}

/// Structural validation before any selection work
pub fn validate_request(request: &ChatCompletionRequest) -> Result<()> {
    if request.messages.is_empty() {
        return Err(GatewayError::Validation(
            "messages must not be empty".to_string(),
        ));
    }
    for (i, message) in request.messages.iter().enumerate() {
        validate_message(i, message)?;
    }
    if let Some(t) = request.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(GatewayError::Validation(format!(
                "temperature must be within [0, 2], got {}",
                t
            )));
        }
    }
    if let Some(p) = request.top_p {
        if !(0.0..=1.0).contains(&p) {
            return Err(GatewayError::Validation(format!(
                "top_p must be within [0, 1], got {}",
                p
            )));
        }
    }
    if let Some(m) = request.max_tokens {
        if m == 0 {
            return Err(GatewayError::Validation(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_message(index: usize, message: &ChatMessage) -> Result<()> {
    let has_content = message.content.is_some();
    let has_tool_calls = message.tool_calls.as_ref().is_some_and(|t| !t.is_empty());
    if has_content == has_tool_calls {
        return Err(GatewayError::Validation(format!(
            "message {}: exactly one of content or tool_calls must be present",
            index
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MessageContent, MessageRole};

    fn message(content: Option<&str>) -> ChatMessage {
        ChatMessage {
            role: MessageRole::User,
            content: content.map(|c| MessageContent::Text(c.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages,
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

    #[test]
    fn empty_messages_are_rejected() {
        assert!(validate_request(&request(vec![])).is_err());
    }

    #[test]
    fn message_needs_content_or_tool_calls() {
        assert!(validate_request(&request(vec![message(None)])).is_err());
        assert!(validate_request(&request(vec![message(Some("hi"))])).is_ok());
    }

    #[test]
    fn parameter_ranges_are_enforced() {
        let mut req = request(vec![message(Some("hi"))]);
        req.temperature = Some(2.5);
        assert!(validate_request(&req).is_err());

        req.temperature = Some(2.0);
        req.top_p = Some(1.5);
        assert!(validate_request(&req).is_err());

        req.top_p = Some(0.9);
        req.max_tokens = Some(0);
        assert!(validate_request(&req).is_err());

        req.max_tokens = Some(1);
        assert!(validate_request(&req).is_ok());
    }
}
