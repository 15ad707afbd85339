//! Accounting webhooks
//!
//! `/webhook/calculate-tokens` triggers one accounting run, protected by a
//! shared secret; `/webhook/status` is an unauthenticated liveness view of
//! the processor counters.

use actix_web::{HttpRequest, HttpResponse, web};
use serde::Deserialize;
use serde_json::json;

use crate::server::AppState;
use crate::utils::crypto::constant_time_eq;
use crate::utils::error::{GatewayError, Result};

const SECRET_HEADER: &str = "X-Webhook-Secret";

/// Optional overrides for one accounting run
#[derive(Debug, Deserialize)]
pub struct AccountingParams {
    /// Records to process
    pub batch_size: Option<u64>,
    /// Soft deadline in milliseconds
    pub time_limit: Option<u64>,
}

/// Trigger one accounting run; 409 while another run is in flight
pub async fn calculate_tokens(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<AccountingParams>,
) -> Result<HttpResponse> {
    verify_secret(&state, &req)?;

    let batch_size = query.batch_size.unwrap_or(state.config.accounting.batch_size);
    let time_limit = query.time_limit.unwrap_or(state.config.accounting.time_limit_ms);

    let stats = state.accounting.process_ready(batch_size, time_limit).await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// Processor counters; intentionally unauthenticated
pub async fn status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "processor": state.accounting.counters(),
    }))
}

fn verify_secret(state: &AppState, req: &HttpRequest) -> Result<()> {
    let expected = std::env::var(&state.config.accounting.webhook_secret_env)
        .map_err(|_| GatewayError::Auth("webhook secret not configured".to_string()))?;

    let provided = req
        .headers()
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Auth(format!("missing {} header", SECRET_HEADER)))?;

    if !constant_time_eq(provided, &expected) {
        return Err(GatewayError::Auth("invalid webhook secret".to_string()));
    }
    Ok(())
}
