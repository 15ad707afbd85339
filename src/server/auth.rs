//! API-key authentication and wallet gating
//!
//! Handlers call [`authenticate`] before any work: resolve the bearer key
//! against its stored digest, then check the wallet holds a positive
//! balance. Key material is hashed immediately and never logged.

use actix_web::HttpRequest;
use sha2::{Digest, Sha256};

use super::AppState;
use crate::core::orchestrator::RequestIdentity;
use crate::storage::queries;
use crate::utils::error::{GatewayError, Result};

/// Resolve the caller's identity and verify funds
pub async fn authenticate(state: &AppState, req: &HttpRequest) -> Result<RequestIdentity> {
    let key = bearer_token(req)?;
    let key_hash = hex::encode(Sha256::digest(key.as_bytes()));

    let api_key = queries::find_api_key_by_hash(state.db.conn(), &key_hash)
        .await?
        .ok_or_else(|| GatewayError::Auth("invalid API key".to_string()))?;

    let balance = queries::wallet_balance(state.db.conn(), api_key.user_id)
        .await?
        .unwrap_or(0.0);
    if balance <= 0.0 {
        return Err(GatewayError::InsufficientFunds(
            "wallet balance is empty; top up to continue".to_string(),
        ));
    }

    Ok(RequestIdentity {
        user_id: api_key.user_id,
        api_key_id: api_key.id,
        api_key_name: api_key.name,
    })
}

fn bearer_token(req: &HttpRequest) -> Result<String> {
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Auth("missing Authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Auth("Authorization header must be 'Bearer <key>'".to_string()))
}
