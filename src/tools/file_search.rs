// src/tools/file_search.rs — Search over a conversation's attached files

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Tool, ToolCallError, ToolContext, ToolOutcome};
use crate::provider::registry::CostCalculator;
use crate::provider::ModelProvider;
use crate::retrieval::{search_vectors, VectorStore};

pub const LOOKUP_KEY: &str = "file_search";

/// Searches the union of the embedding sets of the files attached along
/// the branch being answered.
pub struct FileSearchTool {
    provider: Arc<dyn ModelProvider>,
    store: Arc<Mutex<VectorStore>>,
    calculator: CostCalculator,
    embedding_model: String,
    limit: usize,
    enabled: bool,
}

impl FileSearchTool {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        store: Arc<Mutex<VectorStore>>,
        calculator: CostCalculator,
        embedding_model: impl Into<String>,
        limit: usize,
        enabled: bool,
    ) -> Self {
        Self {
            provider,
            store,
            calculator,
            embedding_model: embedding_model.into(),
            limit,
            enabled,
        }
    }
}

#[async_trait]
impl Tool for FileSearchTool {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn description(&self) -> String {
        "Searches uploaded file content for relevant information based on your query. \
         Returns the most relevant excerpts in JSON format."
            .into()
    }

    fn system_instructions(&self) -> Option<String> {
        Some(format!(
            "Files have been uploaded. When answering questions, use the {LOOKUP_KEY} tool \
             to search the files if the question might be related to the file content. Use \
             your judgment to determine if the files are likely relevant before searching."
        ))
    }

    fn definitions(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Query to search the uploaded files for."
                },
            },
            "required": ["query"]
        })
    }

    async fn call(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolCallError> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| ToolCallError::new("missing 'query' argument"))?;

        if ctx.files.is_empty() {
            return Ok(ToolOutcome::free("[]"));
        }

        let embedding = self
            .provider
            .embed(&self.embedding_model, query)
            .await
            .map_err(|e| ToolCallError::new(e.to_string()))?;

        let cost = self
            .calculator
            .calculate(&self.embedding_model, &embedding.usage)
            .map_err(|e| ToolCallError::new(e.to_string()))?;

        let unit_ids: Vec<_> = ctx.files.iter().map(|f| f.id).collect();
        let records = {
            let store = self.store.lock().unwrap();
            store
                .load_units(&unit_ids)
                .map_err(|e| ToolCallError::new(e.to_string()))?
        };
        let hits = search_vectors(&embedding.vector, &records, self.limit);

        let texts: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        let content = serde_json::to_string(&texts)
            .unwrap_or_else(|e| format!("Failed to encode results: {e}"));

        Ok(ToolOutcome { content, cost })
    }
}
