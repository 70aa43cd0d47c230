use serde::Serialize;

use crate::pipeline::translator::TranslatorStats;

/// Rates per million tokens.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricingPolicy {
    pub input_per_million: f64,
    pub cached_input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            input_per_million: 3.75,
            cached_input_per_million: 1.875,
            output_per_million: 15.0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct CostSummary {
    pub input_tokens: usize,
    pub cached_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
    pub input_cost: f64,
    pub cached_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub cost_per_1k_tokens: f64,
}

impl PricingPolicy {
    /// Prices the estimated token counts of a translator run. Cached tokens
    /// are the ones a cache hit saved; they are priced at the cached rate.
    pub fn summarize(&self, stats: &TranslatorStats) -> CostSummary {
        let input_cost = per_million(stats.input_tokens, self.input_per_million);
        let cached_cost = per_million(stats.cached_tokens, self.cached_input_per_million);
        let output_cost = per_million(stats.output_tokens, self.output_per_million);
        let total_cost = input_cost + cached_cost + output_cost;
        let total_tokens = stats.input_tokens + stats.cached_tokens + stats.output_tokens;
        let cost_per_1k_tokens = if total_tokens > 0 {
            total_cost * 1000.0 / total_tokens as f64
        } else {
            0.0
        };
        CostSummary {
            input_tokens: stats.input_tokens,
            cached_tokens: stats.cached_tokens,
            output_tokens: stats.output_tokens,
            total_tokens,
            input_cost,
            cached_cost,
            output_cost,
            total_cost,
            cost_per_1k_tokens,
        }
    }
}

fn per_million(tokens: usize, rate: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * rate
}
