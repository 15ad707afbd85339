//! Error handling for the gateway
//!
//! This module defines all error types used throughout the gateway and their
//! mapping onto OpenAI-style HTTP error bodies.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication errors (missing or unknown API key)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Wallet balance too low to serve the request
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// No provider variant survived the capability filters
    #[error("No providers available for model '{model}'")]
    NoCandidates {
        /// Requested model id
        model: String,
        /// One line per eliminated variant naming the filter that removed it
        diagnostics: Vec<String>,
    },

    /// An upstream provider failed
    #[error("Upstream error from {provider}: {message}")]
    Upstream {
        /// Provider that produced the error
        provider: String,
        /// HTTP status reported by the upstream (0 when transport-level)
        status: u16,
        /// Upstream error message
        message: String,
        /// True when the error is the caller's fault and must not trigger fallback
        business: bool,
    },

    /// Stream failed after the first chunk was already forwarded
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Conflicting concurrent operation (e.g. accounting already running)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// OpenAI-style error body: `{"error": {...}}`
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    message: String,
    #[serde(rename = "type")]
    error_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl GatewayError {
    /// The OpenAI-style `error.type` string for this error
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) | GatewayError::NoCandidates { .. } => {
                "invalid_request_error"
            }
            GatewayError::Auth(_) => "authentication_error",
            GatewayError::InsufficientFunds(_) => "insufficient_funds",
            GatewayError::Upstream { .. } => "upstream_error",
            GatewayError::StreamInterrupted(_) => "stream_error",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::NotFound(_) => "not_found_error",
            GatewayError::Timeout(_) => "timeout_error",
            _ => "internal_error",
        }
    }

    /// True when this error was classified as caller-caused by an adapter
    pub fn is_business(&self) -> bool {
        matches!(self, GatewayError::Upstream { business: true, .. })
    }

    fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) | GatewayError::NoCandidates { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InsufficientFunds(_) => StatusCode::PAYMENT_REQUIRED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream {
                business: true,
                status,
                ..
            } => {
                // Business errors pass the upstream status through when it is
                // a well-formed 4xx; anything else degrades to 400.
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            // Transient upstream errors only reach the caller after every
            // candidate has been exhausted.
            GatewayError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        self.http_status()
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.http_status();

        let (provider, details) = match self {
            GatewayError::Upstream { provider, .. } => (Some(provider.as_str()), None),
            GatewayError::NoCandidates { diagnostics, .. } => {
                (None, Some(serde_json::json!(diagnostics)))
            }
            _ => (None, None),
        };

        // Internal messages are not leaked verbatim to callers
        let message = match self {
            GatewayError::Database(_) => "Database operation failed".to_string(),
            GatewayError::Io(_) => "IO operation failed".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status).json(ErrorBody {
            error: ErrorDetail {
                message,
                error_type: self.error_type(),
                code: Some(status.as_u16()),
                provider,
                details,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_upstream_keeps_upstream_status() {
        let err = GatewayError::Upstream {
            provider: "openai".to_string(),
            status: 422,
            message: "bad schema".to_string(),
            business: true,
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.is_business());
    }

    #[test]
    fn transient_upstream_maps_to_500() {
        let err = GatewayError::Upstream {
            provider: "openai".to_string(),
            status: 503,
            message: "overloaded".to_string(),
            business: false,
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_business());
    }

    #[test]
    fn no_candidates_is_a_400_with_details() {
        let err = GatewayError::NoCandidates {
            model: "gpt-4o".to_string(),
            diagnostics: vec!["provider-a: no tool calling".to_string()],
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "invalid_request_error");
    }
}
