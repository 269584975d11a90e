//! Cost accounting.
//!
//! Rates are USD per one million tokens.

use crate::model::TokenUsage;
use serde::{Deserialize, Serialize};
use std::ops::Add;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

fn price(tokens: u64, rate: f64) -> f64 {
    tokens as f64 * rate / TOKENS_PER_UNIT
}

/// Pricing entry for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenCost {
    pub input: f64,
    pub output: f64,
    /// Rate for cached input; cached tokens bill at `input` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input: Option<f64>,
}

impl TokenCost {
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            cached_input: None,
        }
    }

    pub fn with_cached_input(mut self, rate: f64) -> Self {
        self.cached_input = Some(rate);
        self
    }
}

/// USD amounts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    pub cached_input: f64,
    pub total: f64,
}

impl Add for CostBreakdown {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input: self.input + rhs.input,
            output: self.output + rhs.output,
            cached_input: self.cached_input + rhs.cached_input,
            total: self.total + rhs.total,
        }
    }
}

/// Price `usage` against `pricing`.
///
/// Returns `None` when there is no pricing entry. Without a cached rate,
/// cached tokens are billed as ordinary input and reported under `input`.
pub fn estimate_usd(usage: &TokenUsage, pricing: Option<&TokenCost>) -> Option<CostBreakdown> {
    let pricing = pricing?;

    let mut input = price(usage.input_tokens, pricing.input);
    let output = price(usage.output_tokens, pricing.output);
    let cached_input = match pricing.cached_input {
        Some(rate) => price(usage.cached_input_tokens, rate),
        None => {
            input += price(usage.cached_input_tokens, pricing.input);
            0.0
        }
    };

    Some(CostBreakdown {
        input,
        output,
        cached_input,
        total: input + output + cached_input,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_input_and_output() {
        let usage = TokenUsage::new(10, 1);
        let cost = estimate_usd(&usage, Some(&TokenCost::new(1.0, 2.0))).unwrap();
        let expected = 10.0 * (1.0 / 1_000_000.0) + 1.0 * (2.0 / 1_000_000.0);
        assert!((cost.total - expected).abs() < 1e-15);
        assert_eq!(cost.cached_input, 0.0);
    }

    #[test]
    fn absent_pricing_is_none() {
        assert_eq!(estimate_usd(&TokenUsage::new(1000, 1000), None), None);
        assert_eq!(estimate_usd(&TokenUsage::default(), None), None);
    }

    #[test]
    fn deterministic() {
        let usage = TokenUsage::new(1234, 567).with_cached(89);
        let pricing = TokenCost::new(3.0, 15.0).with_cached_input(0.3);
        assert_eq!(
            estimate_usd(&usage, Some(&pricing)),
            estimate_usd(&usage, Some(&pricing))
        );
    }

    #[test]
    fn cached_rate_applies_when_present() {
        let usage = TokenUsage::new(0, 0).with_cached(1_000_000);
        let cost = estimate_usd(&usage, Some(&TokenCost::new(2.0, 8.0).with_cached_input(0.5))).unwrap();
        assert_eq!(cost.cached_input, 0.5);
        assert_eq!(cost.input, 0.0);
        assert_eq!(cost.total, 0.5);
    }

    #[test]
    fn cached_tokens_fall_back_to_input_rate() {
        let usage = TokenUsage::new(1_000_000, 0).with_cached(1_000_000);
        let cost = estimate_usd(&usage, Some(&TokenCost::new(2.0, 8.0))).unwrap();
        assert_eq!(cost.input, 4.0);
        assert_eq!(cost.cached_input, 0.0);
        assert_eq!(cost.total, 4.0);
    }

    #[test]
    fn zero_usage_with_pricing_is_zero_not_none() {
        let cost = estimate_usd(&TokenUsage::default(), Some(&TokenCost::new(1.0, 1.0)));
        assert_eq!(cost.map(|c| c.total), Some(0.0));
    }
}
