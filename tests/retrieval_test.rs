// tests/retrieval_test.rs — Integration test: vector store on disk

use rusqlite::Connection;
use tempfile::TempDir;
use uuid::Uuid;

use weft::retrieval::{run_migrations, EmbeddingRecord, Scope, VectorStore};
use weft::tenant::{AssistantId, WorkspaceId};

fn chunk(content: &str, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        content: content.into(),
        vector,
    }
}

#[test]
fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("embeddings.db");
    let assistant = AssistantId::new();
    let scope = Scope::KnowledgeBase(assistant);
    let unit = Uuid::new_v4();

    {
        let conn = Connection::open(&path).unwrap();
        run_migrations(&conn).unwrap();
        let store = VectorStore::new(conn);
        store
            .put_unit(
                &scope,
                unit,
                &[
                    chunk("shipping takes two days", vec![0.9, 0.1, 0.0]),
                    chunk("returns within 30 days", vec![0.0, 1.0, 0.0]),
                ],
            )
            .unwrap();
    }

    // Reopen the same file: migrations are a no-op, data is intact.
    let conn = Connection::open(&path).unwrap();
    run_migrations(&conn).unwrap();
    let store = VectorStore::new(conn);

    let hits = store.search(&scope, &[1.0, 0.0, 0.0], 5).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].content, "shipping takes two days");

    // Deleting the ingested unit empties the scope.
    assert_eq!(store.delete_unit(unit).unwrap(), 2);
    assert!(store.search(&scope, &[1.0, 0.0, 0.0], 5).unwrap().is_empty());
}

#[test]
fn scopes_do_not_leak_into_each_other() {
    let conn = Connection::open_in_memory().unwrap();
    run_migrations(&conn).unwrap();
    let store = VectorStore::new(conn);

    let kb = Scope::KnowledgeBase(AssistantId::new());
    let ws = Scope::Workspace(WorkspaceId::new());
    store
        .put_unit(&kb, Uuid::new_v4(), &[chunk("kb chunk", vec![1.0])])
        .unwrap();
    store
        .put_unit(&ws, Uuid::new_v4(), &[chunk("ws chunk", vec![1.0])])
        .unwrap();

    let kb_hits = store.search(&kb, &[1.0], 5).unwrap();
    assert_eq!(kb_hits.len(), 1);
    assert_eq!(kb_hits[0].content, "kb chunk");

    let ws_hits = store.search(&ws, &[1.0], 5).unwrap();
    assert_eq!(ws_hits.len(), 1);
    assert_eq!(ws_hits[0].content, "ws chunk");
}

#[test]
fn mixed_dimension_records_rank_without_error() {
    let conn = Connection::open_in_memory().unwrap();
    run_migrations(&conn).unwrap();
    let store = VectorStore::new(conn);

    let scope = Scope::KnowledgeBase(AssistantId::new());
    store
        .put_unit(
            &scope,
            Uuid::new_v4(),
            &[
                chunk("short vector", vec![1.0, 0.0]),
                chunk("long vector", vec![1.0, 0.0, 0.0, 0.0]),
            ],
        )
        .unwrap();

    // Query dimension matches neither record exactly; similarity is
    // computed over the shorter length in each pairing.
    let hits = store.search(&scope, &[1.0, 0.0, 0.0], 5).unwrap();
    assert_eq!(hits.len(), 2);
    for hit in hits {
        assert!((hit.similarity - 1.0).abs() < 1e-6);
    }
}
