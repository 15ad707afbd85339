//! Liveness probe

use actix_web::HttpResponse;
use serde_json::json;

/// Unauthenticated liveness endpoint
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": crate::NAME,
        "version": crate::VERSION,
    }))
}
