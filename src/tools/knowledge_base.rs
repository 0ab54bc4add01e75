// src/tools/knowledge_base.rs — Assistant knowledge base search

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Tool, ToolCallError, ToolContext, ToolOutcome};
use crate::provider::registry::CostCalculator;
use crate::provider::ModelProvider;
use crate::retrieval::{Scope, VectorStore};

pub const LOOKUP_KEY: &str = "knowledge_base";

/// Searches the attached assistant's knowledge base and returns the most
/// relevant chunk texts as a JSON array. The embedding call it makes is
/// billed into the session as tool cost.
pub struct KnowledgeBaseTool {
    provider: Arc<dyn ModelProvider>,
    store: Arc<Mutex<VectorStore>>,
    calculator: CostCalculator,
    embedding_model: String,
    limit: usize,
}

impl KnowledgeBaseTool {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        store: Arc<Mutex<VectorStore>>,
        calculator: CostCalculator,
        embedding_model: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            provider,
            store,
            calculator,
            embedding_model: embedding_model.into(),
            limit,
        }
    }
}

#[async_trait]
impl Tool for KnowledgeBaseTool {
    fn description(&self) -> String {
        "Searches the knowledge base for relevant information based on your query. \
         Returns the most relevant results in JSON format. Always prioritize using \
         this tool when answering questions that might be covered in the knowledge base."
            .into()
    }

    fn definitions(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Query to search the knowledge base for."
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

        let Some(assistant) = ctx.assistant else {
            // Not an error to the session: the model sees the problem and
            // can answer without the knowledge base.
            return Ok(ToolOutcome::free(
                serde_json::json!({"error": "no assistant context provided"}).to_string(),
            ));
        };

        let embedding = self
            .provider
            .embed(&self.embedding_model, query)
            .await
            .map_err(|e| ToolCallError::new(e.to_string()))?;

        let cost = self
            .calculator
            .calculate(&self.embedding_model, &embedding.usage)
            .map_err(|e| ToolCallError::new(e.to_string()))?;

        let hits = {
            let store = self.store.lock().unwrap();
            store
                .search(
                    &Scope::KnowledgeBase(assistant.id),
                    &embedding.vector,
                    self.limit,
                )
                .map_err(|e| ToolCallError::new(e.to_string()))?
        };

        let texts: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        let content = serde_json::to_string(&texts)
            .unwrap_or_else(|e| format!("Failed to encode results: {e}"));

        Ok(ToolOutcome { content, cost })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Conversation;
    use crate::provider::registry::ModelRegistry;
    use crate::provider::{Embedding, EventStream, GenerationRequest, TokenUsage};
    use crate::retrieval::{run_migrations, EmbeddingRecord};
    use crate::tenant::{Assistant, User, Workspace};
    use crate::infra::errors::WeftError;
    use rusqlite::Connection;
    use uuid::Uuid;

    struct FixedEmbedder;

    #[async_trait]
    impl ModelProvider for FixedEmbedder {
        fn key(&self) -> &str {
            "fixed"
        }

        async fn stream_message(
            &self,
            _request: GenerationRequest,
        ) -> Result<EventStream, WeftError> {
            unimplemented!("not used by the tool")
        }

        async fn embed(&self, _model: &str, _text: &str) -> Result<Embedding, WeftError> {
            Ok(Embedding {
                vector: vec![1.0, 0.0],
                usage: TokenUsage {
                    input_tokens: 4,
                    output_tokens: 0,
                },
            })
        }
    }

    fn tool_with_store() -> (KnowledgeBaseTool, Arc<Mutex<VectorStore>>) {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let store = Arc::new(Mutex::new(VectorStore::new(conn)));
        let calculator = CostCalculator::new(Arc::new(ModelRegistry::directory()));
        let tool = KnowledgeBaseTool::new(
            Arc::new(FixedEmbedder),
            Arc::clone(&store),
            calculator,
            "text-embedding-3-small",
            5,
        );
        (tool, store)
    }

    #[tokio::test]
    async fn test_search_returns_chunk_texts() {
        let (tool, store) = tool_with_store();
        let workspace = Workspace::new("acme");
        let user = User::new("dana");
        let conversation = Conversation::new(workspace.id);
        let assistant = Assistant::new("Support Bot");

        store
            .lock()
            .unwrap()
            .put_unit(
                &Scope::KnowledgeBase(assistant.id),
                Uuid::new_v4(),
                &[
                    EmbeddingRecord {
                        content: "refunds take 5 days".into(),
                        vector: vec![1.0, 0.0],
                    },
                    EmbeddingRecord {
                        content: "unrelated".into(),
                        vector: vec![-1.0, 0.0],
                    },
                ],
            )
            .unwrap();

        let ctx = ToolContext {
            conversation: &conversation,
            workspace: &workspace,
            user: &user,
            assistant: Some(&assistant),
            files: &[],
        };
        let outcome = tool
            .call(&ctx, &serde_json::json!({"query": "refund policy"}))
            .await
            .unwrap();

        let texts: Vec<String> = serde_json::from_str(&outcome.content).unwrap();
        assert_eq!(texts[0], "refunds take 5 days");
        assert!(outcome.cost.value() > 0.0);
    }

    #[tokio::test]
    async fn test_no_assistant_is_content_not_error() {
        let (tool, _store) = tool_with_store();
        let workspace = Workspace::new("acme");
        let user = User::new("dana");
        let conversation = Conversation::new(workspace.id);
        let ctx = ToolContext {
            conversation: &conversation,
            workspace: &workspace,
            user: &user,
            assistant: None,
            files: &[],
        };
        let outcome = tool
            .call(&ctx, &serde_json::json!({"query": "q"}))
            .await
            .unwrap();
        assert!(outcome.content.contains("no assistant"));
        assert!(outcome.cost.is_zero());
    }

    #[tokio::test]
    async fn test_missing_query_is_call_error() {
        let (tool, _store) = tool_with_store();
        let workspace = Workspace::new("acme");
        let user = User::new("dana");
        let conversation = Conversation::new(workspace.id);
        let assistant = Assistant::new("bot");
        let ctx = ToolContext {
            conversation: &conversation,
            workspace: &workspace,
            user: &user,
            assistant: Some(&assistant),
            files: &[],
        };
        let err = tool.call(&ctx, &serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("query"));
    }
}
