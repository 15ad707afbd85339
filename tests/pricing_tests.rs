//! Pricing method behavior
//!
//! The cache formulas charge cached tokens at the discounted rate on top of
//! the full input charge; this matches production billing and is asserted
//! here with literal figures.

use modelmux::core::accounting::pricing::{calculate_cost, calculate_cost_with_fallback};
use modelmux::core::catalog::PricingMethod;

const EPS: f64 = 1e-9;

#[test]
fn openai_cache_50_literal_figures() {
    // input=1000, output=200, cached=600, P_in=3, P_out=15
    // (600*3*0.50 + 1000*3)/1000 + (200*15)/1000 = 0.9 + 3.0 + 3.0
    let cost = calculate_cost(
        1000,
        200,
        Some(600),
        PricingMethod::OpenAiCache50,
        3.0,
        15.0,
    )
    .unwrap();
    assert!((cost - 6.9).abs() < EPS);
}

#[test]
fn full_method_table() {
    let cases: &[(PricingMethod, f64)] = &[
        (PricingMethod::Standard, 5.0),
        (PricingMethod::AnthropicCache, 5.08),
        (PricingMethod::OpenAiCache50, 5.4),
        (PricingMethod::OpenAiCache75, 5.6),
        (PricingMethod::DeepseekCache, 5.08),
        (PricingMethod::GoogleCache, 5.08),
        (PricingMethod::GoogleImplicit, 5.08),
        (PricingMethod::GoogleExplicit, 5.08),
        (PricingMethod::BedrockCache, 5.08),
    ];

    // input=1000, output=100, cached=400, P_in=2, P_out=30
    for &(method, expected) in cases {
        let cost = calculate_cost(1000, 100, Some(400), method, 2.0, 30.0).unwrap();
        assert!(
            (cost - expected).abs() < EPS,
            "{:?}: got {}, want {}",
            method,
            cost,
            expected
        );
    }
}

#[test]
fn unknown_cache_count_forces_standard() {
    for method in [
        PricingMethod::AnthropicCache,
        PricingMethod::OpenAiCache50,
        PricingMethod::OpenAiCache75,
        PricingMethod::BedrockCache,
    ] {
        let cost = calculate_cost(1000, 100, None, method, 2.0, 30.0).unwrap();
        let standard = calculate_cost(1000, 100, None, PricingMethod::Standard, 2.0, 30.0).unwrap();
        assert!((cost - standard).abs() < EPS, "{:?}", method);
    }
}

#[test]
fn accounting_total_is_sum_of_per_record_costs() {
    // A batch of records priced independently must sum exactly to the total
    // debited; mirrors the worker's per-record transaction amounts.
    let records = [
        (1000_i64, 200_i64, Some(600_i64), PricingMethod::OpenAiCache50, 3.0, 15.0),
        (500, 50, None, PricingMethod::Standard, 2.0, 10.0),
        (2000, 0, Some(2000), PricingMethod::AnthropicCache, 1.0, 5.0),
    ];

    let total: f64 = records
        .iter()
        .map(|&(i, o, c, m, pin, pout)| calculate_cost(i, o, c, m, pin, pout).unwrap())
        .sum();

    let expected = 6.9 + (500.0 * 2.0 + 50.0 * 10.0) / 1000.0 + (2000.0 * 1.0 * 0.1 + 2000.0 * 1.0) / 1000.0;
    assert!((total - expected).abs() < EPS);
}

#[test]
fn fallback_recovers_from_a_broken_cache_count() {
    let cost = calculate_cost_with_fallback(
        1000,
        100,
        Some(-1),
        PricingMethod::OpenAiCache75,
        2.0,
        30.0,
    )
    .unwrap();
    let standard = calculate_cost(1000, 100, None, PricingMethod::Standard, 2.0, 30.0).unwrap();
    assert!((cost - standard).abs() < EPS);
}
