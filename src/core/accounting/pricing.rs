//! Cost calculation
//!
//! Maps token counts and variant prices onto a USD cost according to the
//! variant's pricing method. Cached tokens are charged at the method's
//! discounted rate on top of the full input charge; unknown cache counts
//! (NULL) force the standard method.

use crate::core::catalog::PricingMethod;
use crate::utils::error::{GatewayError, Result};

/// Cost of one request in USD.
///
/// Prices are per 1000 tokens. A `cached` of `None` means the upstream never
/// reported cache usage and the standard method applies regardless of the
/// variant's configuration.
pub fn calculate_cost(
    input_tokens: i64,
    output_tokens: i64,
    cached_tokens: Option<i64>,
    method: PricingMethod,
    price_in: f64,
    price_out: f64,
) -> Result<f64> {
    validate_inputs(input_tokens, output_tokens, cached_tokens, price_in, price_out)?;

    let input = input_tokens as f64;
    let output = output_tokens as f64;

    let input_cost = match (cached_tokens, method.cached_rate()) {
        (Some(cached), Some(rate)) => (cached as f64 * price_in * rate + input * price_in) / 1000.0,
        _ => input * price_in / 1000.0,
    };
    let output_cost = output * price_out / 1000.0;

    let total = input_cost + output_cost;
    if !total.is_finite() {
        return Err(GatewayError::Internal(format!(
            "cost overflowed for {} input / {} output tokens",
            input_tokens, output_tokens
        )));
    }
    Ok(total)
}

/// Like [`calculate_cost`] but degrades to the standard method when the
/// configured one fails.
pub fn calculate_cost_with_fallback(
    input_tokens: i64,
    output_tokens: i64,
    cached_tokens: Option<i64>,
    method: PricingMethod,
    price_in: f64,
    price_out: f64,
) -> Result<f64> {
    calculate_cost(input_tokens, output_tokens, cached_tokens, method, price_in, price_out).or_else(
        |_| {
            calculate_cost(
                input_tokens,
                output_tokens,
                None,
                PricingMethod::Standard,
                price_in,
                price_out,
            )
        },
    )
}

fn validate_inputs(
    input_tokens: i64,
    output_tokens: i64,
    cached_tokens: Option<i64>,
    price_in: f64,
    price_out: f64,
) -> Result<()> {
    if input_tokens < 0 || output_tokens < 0 || cached_tokens.is_some_and(|c| c < 0) {
        return Err(GatewayError::Internal(format!(
            "negative token counts: input={}, output={}, cached={:?}",
            input_tokens, output_tokens, cached_tokens
        )));
    }
    if !price_in.is_finite() || !price_out.is_finite() || price_in < 0.0 || price_out < 0.0 {
        return Err(GatewayError::Internal(format!(
            "invalid prices: in={}, out={}",
            price_in, price_out
        )));
    }
    Ok(())
}
