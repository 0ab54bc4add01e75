// src/retrieval/store.rs — SQLite-backed embedding store

use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use super::{search_vectors, EmbeddingRecord, Scope, ScoredChunk};

/// A database migration with version, name, and SQL statements.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "embeddings",
    up: include_str!("migrations/001_embeddings.up.sql"),
    down: include_str!("migrations/001_embeddings.down.sql"),
}];

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        info!(
            "Applying migration {}: {}",
            migration.version, migration.name
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up)?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Low-level storage for embedding chunks. Records are written once at
/// ingestion and only removed when their owning data unit is deleted.
pub struct VectorStore {
    conn: Connection,
}

impl VectorStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Store the chunks of one ingested data unit, replacing any prior
    /// rows for the same unit (re-ingestion).
    pub fn put_unit(
        &self,
        scope: &Scope,
        unit_id: Uuid,
        records: &[EmbeddingRecord],
    ) -> anyhow::Result<()> {
        let namespace = scope.namespace();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM embeddings WHERE unit_id = ?1",
            params![unit_id.to_string()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO embeddings (namespace, unit_id, content, vector)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in records {
                stmt.execute(params![
                    namespace,
                    unit_id.to_string(),
                    record.content,
                    vector_to_blob(&record.vector),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete every chunk belonging to a data unit. Returns the number
    /// of removed rows.
    pub fn delete_unit(&self, unit_id: Uuid) -> anyhow::Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM embeddings WHERE unit_id = ?1",
            params![unit_id.to_string()],
        )?;
        Ok(removed)
    }

    /// Every record stored under a scope's namespace.
    pub fn load_scope(&self, scope: &Scope) -> anyhow::Result<Vec<EmbeddingRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT content, vector FROM embeddings WHERE namespace = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![scope.namespace()], |row| {
            Ok(EmbeddingRecord {
                content: row.get(0)?,
                vector: blob_to_vector(&row.get::<_, Vec<u8>>(1)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The union of the embedding sets of the given data units, in
    /// stored order. Used for searching a conversation's attached files.
    pub fn load_units(&self, unit_ids: &[Uuid]) -> anyhow::Result<Vec<EmbeddingRecord>> {
        let mut records = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT content, vector FROM embeddings WHERE unit_id = ?1 ORDER BY id")?;
        for unit_id in unit_ids {
            let rows = stmt.query_map(params![unit_id.to_string()], |row| {
                Ok(EmbeddingRecord {
                    content: row.get(0)?,
                    vector: blob_to_vector(&row.get::<_, Vec<u8>>(1)?),
                })
            })?;
            for row in rows {
                records.push(row?);
            }
        }
        Ok(records)
    }

    /// Top-K similarity search across a whole scope.
    pub fn search(
        &self,
        scope: &Scope,
        query: &[f32],
        limit: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        let records = self.load_scope(scope)?;
        Ok(search_vectors(query, &records, limit))
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
