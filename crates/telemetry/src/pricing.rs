//! Built-in pricing table used for run cost estimates.
//!
//! Prices are in USD per 1 million tokens. Config may add or override
//! entries at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and config overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let defaults = [
            ("anthropic/claude-sonnet-4", 3.0, 15.0),
            ("anthropic/claude-opus-4", 15.0, 75.0),
            ("anthropic/claude-3.5-haiku", 0.8, 4.0),
            ("openai/gpt-4o", 2.5, 10.0),
            ("openai/gpt-4o-mini", 0.15, 0.6),
            ("openai/o3-mini", 1.1, 4.4),
            ("google/gemini-2.0-flash", 0.1, 0.4),
            ("google/gemini-1.5-pro", 1.25, 5.0),
            ("meta-llama/llama-3.1-70b", 0.52, 0.75),
            ("deepseek/deepseek-v3", 0.27, 1.1),
        ];
        let prices = defaults
            .into_iter()
            .map(|(name, input, output)| (name.to_string(), ModelPricing::new(input, output)))
            .collect();
        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Look up pricing for a model by its exact name.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(model)
            .copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(model.into(), pricing);
    }

    /// Apply a batch of overrides, typically from config.
    pub fn apply_overrides<I, S>(&self, overrides: I)
    where
        I: IntoIterator<Item = (S, ModelPricing)>,
        S: Into<String>,
    {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        for (name, pricing) in overrides {
            prices.insert(name.into(), pricing);
        }
    }

    /// Resolve a model name to its pricing.
    ///
    /// Exact match first, then the bare name after any `provider/` prefix,
    /// then the longest known bare name that prefixes the model (so
    /// `gpt-4o-mini-2024-07-18` resolves to `gpt-4o-mini`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        let bare_model = bare(model).to_lowercase();
        prices
            .iter()
            .map(|(key, pricing)| (bare(key).to_lowercase(), pricing))
            .filter(|(bare_key, _)| bare_model.starts_with(bare_key.as_str()))
            .max_by_key(|(bare_key, _)| bare_key.len())
            .map(|(_, pricing)| *pricing)
    }

    /// Cost of a call, or 0.0 when the model is unknown.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.resolve(model)
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// All known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn bare(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}
