// src/provider/mod.rs — Model provider layer

pub mod openai;
pub mod registry;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::infra::errors::WeftError;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, WeftError>> + Send>>;

/// Core trait that all model providers implement.
///
/// The wire format of any specific upstream is not part of this contract —
/// only the discriminated [`StreamEvent`] shape is.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn key(&self) -> &str;

    /// True when the call runs on a workspace-supplied upstream credential.
    /// Usage on a custom key is never billed against workspace credit.
    fn has_custom_key(&self) -> bool {
        false
    }

    /// Issue one streaming generation call and decode the upstream wire
    /// events into [`StreamEvent`]s.
    async fn stream_message(&self, request: GenerationRequest) -> Result<EventStream, WeftError>;

    /// Embed a single text, returning the vector and the token usage of
    /// the embedding call.
    async fn embed(&self, model: &str, text: &str) -> Result<Embedding, WeftError>;
}

/// One streaming generation request: ordered role-tagged content blocks
/// plus the set of enabled tool definitions.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub model: String,
    pub blocks: Vec<ContentBlock>,
    pub tools: Vec<ToolDef>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A single role-tagged element of the model input, in conversation order
/// (root first).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ContentBlock {
    /// Instructions: assistant profile, quoted-text references, tool usage
    /// hints.
    System(String),
    /// A user turn.
    InputText(String),
    /// An image attached to a user turn. `token_estimate` is a capped
    /// tiling estimate from pixel dimensions, not an exact count.
    InputImage {
        media_type: String,
        data: String,
        token_estimate: u32,
    },
    /// A prior assistant turn.
    OutputText(String),
    /// A tool invocation the model requested in an earlier round.
    ToolCall(ToolCallRecord),
    /// The result (or error text) of a resolved tool invocation.
    ToolOutput { call_id: String, output: String },
}

/// A model-initiated request to invoke a named function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Discriminated events of one streaming model call.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental answer text.
    ContentDelta(String),
    /// Incremental "thinking" trace.
    ReasoningDelta(String),
    /// A fully-buffered tool invocation. Execution happens after the
    /// stream ends, never mid-stream.
    ToolCallComplete(ToolCallRecord),
    /// Final token accounting for the call.
    UsageFinal(TokenUsage),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Result of an embedding call.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub usage: TokenUsage,
}
