//! Model listing endpoints
//!
//! `/v1/models` deduplicates the catalog by caller-facing model id; each
//! entry aggregates its variants (max context, OR of capabilities, provider
//! list).

use std::collections::BTreeMap;

use actix_web::{HttpResponse, web};
use serde::Serialize;

use crate::core::catalog::ModelVariant;
use crate::server::AppState;
use crate::utils::error::{GatewayError, Result};

/// Aggregated model entry
#[derive(Debug, Serialize)]
pub struct ModelEntry {
    /// Caller-facing model id
    pub id: String,
    /// Object type (always "model")
    pub object: String,
    /// Providers offering this model
    pub providers: Vec<String>,
    /// Largest context window across variants, when any is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    /// Any variant supports tool calling
    pub supports_tool_calling: bool,
    /// Any variant supports vision input
    pub supports_vision: bool,
    /// Any variant supports prompt caching
    pub supports_input_cache: bool,
    /// Cheapest total price per 1000 tokens across variants
    pub min_price_per_1k: f64,
}

/// List models, deduplicated by model id
pub async fn list_models(state: web::Data<AppState>) -> Result<HttpResponse> {
    let variants = state.catalog.all_variants().await?;
    let entries = aggregate(variants.iter().map(|v| v.as_ref()));

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "object": "list",
        "data": entries,
    })))
}

/// Single aggregated model
pub async fn get_model(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let model_id = path.into_inner();
    let variants = state.catalog.variants_for_model_id(&model_id).await?;
    if variants.is_empty() {
        return Err(GatewayError::NotFound(format!("model '{}'", model_id)));
    }

    let entries = aggregate(variants.iter().map(|v| v.as_ref()));
    Ok(HttpResponse::Ok().json(&entries[0]))
}

/// Group variants by model id and fold their attributes
fn aggregate<'a>(variants: impl Iterator<Item = &'a ModelVariant>) -> Vec<ModelEntry> {
    let mut grouped: BTreeMap<String, Vec<&ModelVariant>> = BTreeMap::new();
    for v in variants {
        grouped.entry(v.model_id.clone()).or_default().push(v);
    }

    grouped
        .into_iter()
        .map(|(id, group)| ModelEntry {
            id,
            object: "model".to_string(),
            providers: group.iter().map(|v| v.provider.clone()).collect(),
            context_window: group.iter().filter_map(|v| v.context_window).max(),
            supports_tool_calling: group.iter().any(|v| v.supports_tool_calling),
            supports_vision: group.iter().any(|v| v.supports_vision),
            supports_input_cache: group.iter().any(|v| v.supports_input_cache),
            min_price_per_1k: group
                .iter()
                .map(|v| v.total_price())
                .fold(f64::MAX, f64::min),
        })
        .collect()
}
