// src/tools/mod.rs — Tool contract and registry

pub mod file_search;
pub mod knowledge_base;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::conversation::{Conversation, FileRef};
use crate::credit::CreditCount;
use crate::infra::config::RetrievalConfig;
use crate::provider::registry::CostCalculator;
use crate::provider::{ModelProvider, ToolDef};
use crate::retrieval::VectorStore;
use crate::tenant::{Assistant, User, Workspace};

use file_search::FileSearchTool;
use knowledge_base::KnowledgeBaseTool;

/// Context handed to every tool invocation.
pub struct ToolContext<'a> {
    pub conversation: &'a Conversation,
    pub workspace: &'a Workspace,
    pub user: &'a User,
    pub assistant: Option<&'a Assistant>,
    /// Files attached along the branch being answered.
    pub files: &'a [FileRef],
}

/// What a tool call produced: result text fed back to the model, plus
/// any credit cost the tool itself incurred (an embedding call, say).
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub cost: CreditCount,
}

impl ToolOutcome {
    pub fn free(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            cost: CreditCount::ZERO,
        }
    }
}

/// A tool's own failure. This is never a session failure: the message
/// text becomes function-output content so the model can adapt.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ToolCallError(pub String);

impl ToolCallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    fn description(&self) -> String;

    /// JSON schema of the tool's arguments.
    fn definitions(&self) -> serde_json::Value;

    /// Optional static system block advertising the tool to the model.
    fn system_instructions(&self) -> Option<String> {
        None
    }

    async fn call(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolCallError>;
}

/// Named lookup of the tools enabled for a deployment.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<(String, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.push((key.into(), tool));
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|(key, tool)| key == name && tool.is_enabled())
            .map(|(_, tool)| Arc::clone(tool))
    }

    /// Definitions of every enabled tool, for the provider request.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .iter()
            .filter(|(_, tool)| tool.is_enabled())
            .map(|(key, tool)| ToolDef {
                name: key.clone(),
                description: tool.description(),
                parameters: tool.definitions(),
            })
            .collect()
    }

    /// System instruction blocks contributed by enabled tools.
    pub fn system_blocks(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter(|(_, tool)| tool.is_enabled())
            .filter_map(|(_, tool)| tool.system_instructions())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Wire the built-in retrieval tools from configuration.
pub fn default_registry(
    provider: Arc<dyn ModelProvider>,
    store: Arc<Mutex<VectorStore>>,
    calculator: CostCalculator,
    config: &RetrievalConfig,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        knowledge_base::LOOKUP_KEY,
        Arc::new(KnowledgeBaseTool::new(
            Arc::clone(&provider),
            Arc::clone(&store),
            calculator.clone(),
            config.embedding_model.clone(),
            config.limit,
        )),
    );
    registry.register(
        file_search::LOOKUP_KEY,
        Arc::new(FileSearchTool::new(
            provider,
            store,
            calculator,
            config.embedding_model.clone(),
            config.limit,
            config.file_search_enabled,
        )),
    );
    registry
}
