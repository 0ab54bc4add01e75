// src/provider/registry.rs — Model directory and credit cost calculation

use std::collections::HashMap;
use std::sync::Arc;

use crate::credit::CreditCount;
use crate::infra::errors::WeftError;
use crate::provider::TokenUsage;

/// One entry in the model directory.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub key: String,
    pub provider: String,
    pub name: String,
    /// Credits reserved per call before real usage is known.
    pub multiplier: f64,
    /// Credits per input token.
    pub input_rate: f64,
    /// Credits per output token.
    pub output_rate: f64,
    pub supports_tools: bool,
}

/// Directory of models the platform can route to, with their credit rates.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl ModelRegistry {
    /// Built-in directory. Rates are credits per token; deployments
    /// override them via `[credit.rates]` in the config file.
    pub fn directory() -> Self {
        let entry = |key: &str, provider: &str, name: &str, mult: f64, inp: f64, out: f64| {
            ModelEntry {
                key: key.into(),
                provider: provider.into(),
                name: name.into(),
                multiplier: mult,
                input_rate: inp,
                output_rate: out,
                supports_tools: true,
            }
        };

        Self {
            entries: vec![
                entry("gpt-4.1", "openai", "GPT-4.1", 2.0, 0.000002, 0.000008),
                entry("gpt-4.1-mini", "openai", "GPT-4.1 Mini", 1.0, 0.0000004, 0.0000016),
                entry("gpt-4o", "openai", "GPT-4o", 2.0, 0.0000025, 0.00001),
                entry("o3", "openai", "o3", 5.0, 0.00001, 0.00004),
                entry(
                    "claude-sonnet-4",
                    "anthropic",
                    "Claude Sonnet 4",
                    2.0,
                    0.000003,
                    0.000015,
                ),
                entry(
                    "claude-haiku-3-5",
                    "anthropic",
                    "Claude 3.5 Haiku",
                    1.0,
                    0.0000008,
                    0.000004,
                ),
                ModelEntry {
                    key: "text-embedding-3-small".into(),
                    provider: "openai".into(),
                    name: "Text Embedding 3 Small".into(),
                    multiplier: 1.0,
                    input_rate: 0.00000002,
                    output_rate: 0.0,
                    supports_tools: false,
                },
            ],
        }
    }

    /// Apply per-deployment rate overrides. Keys: `<model>` sets the
    /// estimate multiplier, `<model>-input` / `<model>-output` set token
    /// rates. Unknown keys are ignored.
    pub fn with_rates(mut self, rates: &HashMap<String, f64>) -> Self {
        for entry in &mut self.entries {
            if let Some(mult) = rates.get(&entry.key) {
                entry.multiplier = *mult;
            }
            if let Some(rate) = rates.get(&format!("{}-input", entry.key)) {
                entry.input_rate = *rate;
            }
            if let Some(rate) = rates.get(&format!("{}-output", entry.key)) {
                entry.output_rate = *rate;
            }
        }
        self
    }

    pub fn resolve(&self, model: &str) -> Result<&ModelEntry, WeftError> {
        self.entries
            .iter()
            .find(|e| e.key == model)
            .ok_or_else(|| WeftError::ModelNotSupported {
                model: model.into(),
            })
    }

    pub fn contains(&self, model: &str) -> bool {
        self.entries.iter().any(|e| e.key == model)
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }
}

/// Converts token usage into credit cost against the model directory.
///
/// `estimate` is the pre-call reservation amount (a configured per-model
/// multiplier, not real usage); `calculate` is the post-call real cost.
#[derive(Clone)]
pub struct CostCalculator {
    registry: Arc<ModelRegistry>,
}

impl CostCalculator {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Real cost from accumulated token counts.
    pub fn calculate(&self, model: &str, usage: &TokenUsage) -> Result<CreditCount, WeftError> {
        let entry = self.registry.resolve(model)?;
        let cost = entry.input_rate * usage.input_tokens as f64
            + entry.output_rate * usage.output_tokens as f64;
        Ok(CreditCount::new(cost))
    }

    /// Pre-call estimate: the model's multiplier plus the input rate
    /// applied to any tokens already known before the call (image tiles).
    pub fn estimate(&self, model: &str, known_input_tokens: u32) -> Result<CreditCount, WeftError> {
        let entry = self.registry.resolve(model)?;
        let cost = entry.multiplier + entry.input_rate * known_input_tokens as f64;
        Ok(CreditCount::new(cost))
    }
}
