//! Cost estimate types for `/v1/chat/estimate`

use serde::{Deserialize, Serialize};

/// Cost estimate for the best candidate plus alternatives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimateResponse {
    /// Estimated cost of the top-ranked candidate, in `currency`
    pub estimated_cost: f64,
    /// Currency code (always "USD")
    pub currency: String,
    /// Provider of the top-ranked candidate
    pub provider: String,
    /// Model of the top-ranked candidate
    pub model: String,
    /// Remaining candidates in rank order
    pub alternatives: Vec<CostAlternative>,
}

/// One alternative candidate with its estimated cost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAlternative {
    /// Provider name
    pub provider: String,
    /// Model id
    pub model: String,
    /// Estimated cost in USD
    pub estimated_cost: f64,
}
