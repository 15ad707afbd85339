//! HTTP route handlers
//!
//! OpenAI-compatible AI endpoints under `/v1`, accounting webhooks under
//! `/webhook`, and a liveness probe.

pub mod chat;
pub mod health;
pub mod models;
pub mod webhook;

use actix_web::{HttpRequest, web};

use super::AppState;
use crate::core::selector::SelectionOptions;
use crate::core::types::ProviderPreference;
use crate::utils::error::{GatewayError, Result};

/// Register all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            // Chat completions
            .route("/chat/completions", web::post().to(chat::chat_completions))
            // Cost estimate without execution
            .route("/chat/estimate", web::post().to(chat::estimate))
            // Text completions (legacy)
            .route("/completion", web::post().to(chat::completions))
            .route("/completions", web::post().to(chat::completions))
            // Models
            .route("/models", web::get().to(models::list_models))
            .route("/models/{model_id}", web::get().to(models::get_model)),
    )
    .service(
        web::scope("/webhook")
            .route("/calculate-tokens", web::post().to(webhook::calculate_tokens))
            .route("/status", web::get().to(webhook::status)),
    )
    .route("/health", web::get().to(health::health));
}

/// Routing header names
pub const RATIO_HEADER: &str = "X-Price-Performance-Ratio";
/// Provider override header
pub const PROVIDER_HEADER: &str = "X-Provider";

/// Selection options for one call: config defaults, body preferences,
/// header overrides (headers win).
pub fn selection_options(
    state: &AppState,
    req: &HttpRequest,
    body_provider: Option<&ProviderPreference>,
) -> Result<SelectionOptions> {
    let mut options = SelectionOptions {
        ratio_sp: state.config.routing.default_ratio_sp,
        metrics_window_size: state.config.routing.metrics_window_size,
        provider_whitelist: body_provider.map(|p| p.as_list()),
    };

    if let Some(raw) = header_value(req, RATIO_HEADER) {
        let ratio: u8 = raw.parse().map_err(|_| {
            GatewayError::Validation(format!("{} must be an integer 0..=100", RATIO_HEADER))
        })?;
        if ratio > 100 {
            return Err(GatewayError::Validation(format!(
                "{} must be within 0..=100",
                RATIO_HEADER
            )));
        }
        options.ratio_sp = ratio;
    }

    if let Some(raw) = header_value(req, PROVIDER_HEADER) {
        let providers = if raw.trim_start().starts_with('[') {
            serde_json::from_str::<Vec<String>>(&raw).map_err(|_| {
                GatewayError::Validation(format!("{} must be a string or JSON array", PROVIDER_HEADER))
            })?
        } else {
            vec![raw]
        };
        options.provider_whitelist = Some(providers);
    }

    Ok(options)
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
