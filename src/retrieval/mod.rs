// src/retrieval/mod.rs — Similarity search over stored embedding chunks

pub mod store;

pub use store::{run_migrations, VectorStore};

use serde::{Deserialize, Serialize};

use crate::tenant::{AssistantId, WorkspaceId};

/// One stored text chunk with its embedding vector. Produced once when a
/// data unit is ingested; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub content: String,
    pub vector: Vec<f32>,
}

/// A search hit, ordered by similarity descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub content: String,
    pub similarity: f32,
}

/// The namespace a search is restricted to: an assistant's knowledge
/// base, or the files attached across a conversation's workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    KnowledgeBase(AssistantId),
    Workspace(WorkspaceId),
}

impl Scope {
    pub fn namespace(&self) -> String {
        match self {
            Scope::KnowledgeBase(assistant) => format!("assistant:{assistant}"),
            Scope::Workspace(workspace) => format!("workspace:{workspace}"),
        }
    }
}

/// Cosine similarity between two vectors.
///
/// Mismatched dimensions are compared over the shorter length — a
/// defensive posture for mixed-model embeddings, not a normal case. A
/// zero-magnitude vector yields 0.0 rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for i in 0..len {
        dot += a[i] * b[i];
        mag_a += a[i] * a[i];
        mag_b += b[i] * b[i];
    }

    let mag_a = mag_a.sqrt();
    let mag_b = mag_b.sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Score every record against the query and return the top `limit`
/// matches, similarity descending.
pub fn search_vectors(
    query: &[f32],
    records: &[EmbeddingRecord],
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut results: Vec<ScoredChunk> = records
        .iter()
        .map(|record| ScoredChunk {
            content: record.content.clone(),
            similarity: cosine_similarity(&record.vector, query),
        })
        .collect();

    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}
