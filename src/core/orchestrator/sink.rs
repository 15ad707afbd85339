//! Persistence sink for served requests
//!
//! The orchestrator hands finished (or failed) requests to this seam and
//! moves on; writes happen in the background. For one request the write
//! order is fixed: request record, then content, then metrics.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::core::types::Usage;
use crate::storage::entities::{metric, request, request_content};
use crate::storage::{Database, queries};
use crate::utils::error::Result;

/// Caller identity attached by the auth middleware
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    /// Authenticated user
    pub user_id: Uuid,
    /// Key id, for last-used bookkeeping
    pub api_key_id: Uuid,
    /// Key name recorded on the request
    pub api_key_name: String,
}

/// Streaming wall-clock measurements
#[derive(Debug, Clone, Copy)]
pub struct StreamTimings {
    /// Dispatch to stream end
    pub total_duration_ms: i64,
    /// Dispatch to first forwarded chunk
    pub time_to_first_chunk_ms: i64,
    /// First to last chunk
    pub dt_first_last_chunk_ms: i64,
}

/// Everything the sink needs to persist one served request
#[derive(Debug, Clone)]
pub struct ServedRequest {
    /// Request id
    pub request_id: Uuid,
    /// Caller identity
    pub identity: RequestIdentity,
    /// Provider that (last) served the request
    pub provider: String,
    /// Caller-facing model id
    pub model_id: String,
    /// Whether the response was streamed
    pub streaming: bool,
    /// `ready_to_compute` for served requests, `error` for failures
    pub status: &'static str,
    /// Caller's request body
    pub request_body: Value,
    /// Canonical response body, absent on failures
    pub response_body: Option<Value>,
    /// Usage reported by the upstream, when observable
    pub usage: Option<Usage>,
    /// Terminal error message for failures
    pub error_message: Option<String>,
    /// Family evaluator cost attributed to this request
    pub evaluation_cost: Option<f64>,
    /// Streaming measurements
    pub timings: Option<StreamTimings>,
}

/// Write-side seam between the orchestrator and the database
#[async_trait]
pub trait RequestSink: Send + Sync {
    /// Persist one served request: record, content, metrics, key bookkeeping
    async fn persist(&self, served: ServedRequest) -> Result<()>;
}

/// Persist in a detached task so the serving path never waits on the store
pub fn persist_in_background(sink: std::sync::Arc<dyn RequestSink>, served: ServedRequest) {
    tokio::spawn(async move {
        let request_id = served.request_id;
        if let Err(e) = sink.persist(served).await {
            error!("Failed to persist request {}: {}", request_id, e);
        }
    });
}

/// Production sink over the shared database
pub struct SqlRequestSink {
    db: Database,
}

impl SqlRequestSink {
    /// Create over the shared database
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RequestSink for SqlRequestSink {
    async fn persist(&self, served: ServedRequest) -> Result<()> {
        let usage = served.usage.as_ref();

        queries::insert_request(
            self.db.conn(),
            request::Model {
                id: served.request_id,
                user_id: served.identity.user_id,
                api_key_name: served.identity.api_key_name.clone(),
                provider: served.provider.clone(),
                model_id: served.model_id.clone(),
                streaming: served.streaming,
                status: served.status.to_string(),
                input_tokens: usage.map(|u| i64::from(u.prompt_tokens)),
                output_tokens: usage.map(|u| i64::from(u.completion_tokens)),
                cached_tokens: usage.and_then(|u| u.cached_tokens()).map(i64::from),
                evaluation_cost: served.evaluation_cost,
                transaction_id: None,
                error_message: served.error_message.clone(),
                created_at: Utc::now(),
            },
        )
        .await?;

        queries::insert_request_content(
            self.db.conn(),
            request_content::Model {
                request_id: served.request_id,
                request_body: served.request_body,
                response_body: served.response_body,
            },
        )
        .await?;

        if let Some(timings) = served.timings {
            let output_tokens = usage.map(|u| u.completion_tokens);
            let throughput = match output_tokens {
                Some(out) if timings.dt_first_last_chunk_ms > 0 => {
                    Some(f64::from(out) / (timings.dt_first_last_chunk_ms as f64 / 1000.0))
                }
                _ => None,
            };

            queries::insert_metric(
                self.db.conn(),
                metric::Model {
                    id: 0,
                    request_id: served.request_id,
                    total_duration_ms: Some(timings.total_duration_ms),
                    time_to_first_chunk_ms: Some(timings.time_to_first_chunk_ms),
                    dt_first_last_chunk_ms: Some(timings.dt_first_last_chunk_ms),
                    throughput_tokens_per_s: throughput,
                    is_metrics_calculated: throughput.is_some(),
                    created_at: Utc::now(),
                },
            )
            .await?;
        }

        queries::touch_api_key(self.db.conn(), served.identity.api_key_id).await?;

        Ok(())
    }
}
