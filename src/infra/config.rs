// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub credit: CreditConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum number of tool-call round-trips per session. Exceeding the
    /// cap forces settlement with the best available answer.
    pub max_tool_rounds: u32,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Capacity of the caller-facing render buffer. Overflow drops the
    /// oldest deltas for rendering only; stored content is never dropped.
    pub render_buffer: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 4,
            max_output_tokens: 4096,
            temperature: 0.7,
            render_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Per-model credit rate overrides. Keys follow the registry
    /// convention: `<model>` for the estimate multiplier,
    /// `<model>-input` / `<model>-output` for per-token rates.
    #[serde(default)]
    pub rates: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum number of chunks returned by a similarity search.
    pub limit: usize,
    pub embedding_model: String,
    /// Gates the conversation file search tool.
    pub file_search_enabled: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            embedding_model: "text-embedding-3-small".into(),
            file_search_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }
}
