//! SQLite-based vector store implementation.
//!
//! Uses SQLite with cosine similarity computed in Rust for simplicity.
//! Several named collections can share one database file.

use super::{cosine_similarity, lock_error, rank, EmbeddingRecord, IndexedSource, SearchResult, VectorStore};
use crate::chunking::Chunk;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS collections (
        name TEXT PRIMARY KEY,
        dimension INTEGER,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        chunk_id TEXT NOT NULL,
        source_id TEXT NOT NULL,
        title TEXT,
        position INTEGER NOT NULL,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        indexed_at TEXT NOT NULL,
        PRIMARY KEY (collection, chunk_id)
    );

    CREATE INDEX IF NOT EXISTS idx_records_source ON records(collection, source_id);
"#;

const RECORD_COLUMNS: &str =
    "source_id, title, position, start_offset, end_offset, content, embedding, indexed_at";

/// SQLite-based vector store for one collection.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    collection: String,
}

impl SqliteVectorStore {
    /// Open (or create) the database at `path` and the named collection in it.
    #[instrument(skip_all, fields(collection = %collection))]
    pub fn open(path: &Path, collection: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn, collection)?;

        info!("Opened SQLite vector store at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory SQLite vector store (useful for testing).
    pub fn in_memory(collection: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, collection)
    }

    fn with_connection(conn: Connection, collection: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO collections (name, dimension, created_at) VALUES (?1, NULL, ?2)",
            params![collection, Utc::now().to_rfc3339()],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn parse_timestamp(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    /// Insert or replace records inside an open transaction.
    fn insert_records(&self, tx: &Transaction<'_>, records: &[EmbeddingRecord]) -> Result<()> {
        let mut stmt = tx.prepare(
            r#"
            INSERT OR REPLACE INTO records
            (collection, chunk_id, source_id, title, position, start_offset, end_offset,
             content, embedding, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )?;

        for record in records {
            let chunk = &record.chunk;
            stmt.execute(params![
                self.collection,
                record.id(),
                chunk.source_id,
                chunk.title,
                chunk.position,
                chunk.start_offset,
                chunk.end_offset,
                chunk.text,
                Self::embedding_to_bytes(&record.embedding),
                record.indexed_at.to_rfc3339(),
            ])?;
        }
        Ok(())
    }

    /// Map a row selected with `RECORD_COLUMNS`.
    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<EmbeddingRecord> {
        let embedding_bytes: Vec<u8> = row.get(6)?;
        let indexed_at: String = row.get(7)?;

        Ok(EmbeddingRecord {
            chunk: Chunk {
                source_id: row.get(0)?,
                title: row.get(1)?,
                position: row.get(2)?,
                start_offset: row.get(3)?,
                end_offset: row.get(4)?,
                text: row.get(5)?,
            },
            embedding: Self::bytes_to_embedding(&embedding_bytes),
            indexed_at: Self::parse_timestamp(&indexed_at),
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.unchecked_transaction()?;
        self.insert_records(&tx, records)?;
        tx.commit()?;

        debug!("Upserted {} records into {}", records.len(), self.collection);
        Ok(records.len())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn replace_source(&self, source_id: &str, records: &[EmbeddingRecord]) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.unchecked_transaction()?;

        let removed = tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND source_id = ?2",
            params![self.collection, source_id],
        )?;
        self.insert_records(&tx, records)?;
        tx.commit()?;

        info!(
            "Replaced {} records of {} with {}",
            removed,
            source_id,
            records.len()
        );
        Ok(removed)
    }

    #[instrument(skip(self, query_embedding))]
    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE collection = ?1",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![self.collection], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let results: Vec<SearchResult> = records
            .into_iter()
            .map(|record| SearchResult {
                score: cosine_similarity(query_embedding, &record.embedding),
                chunk: record.chunk,
            })
            .collect();

        let ranked = rank(results, limit);
        debug!("Found {} matching records", ranked.len());
        Ok(ranked)
    }

    #[instrument(skip(self))]
    async fn delete_by_source(&self, source_id: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let deleted = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND source_id = ?2",
            params![self.collection, source_id],
        )?;

        info!("Deleted {} records for source {}", deleted, source_id);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn list_sources(&self) -> Result<Vec<IndexedSource>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT source_id, MAX(title), COUNT(*), MAX(end_offset), MAX(indexed_at) AS last_indexed
            FROM records
            WHERE collection = ?1
            GROUP BY source_id
            ORDER BY last_indexed DESC, source_id ASC
            "#,
        )?;

        let sources = stmt
            .query_map(params![self.collection], |row| {
                let indexed_at: String = row.get(4)?;
                Ok(IndexedSource {
                    source_id: row.get(0)?,
                    title: row.get(1)?,
                    chunk_count: row.get(2)?,
                    total_chars: row.get(3)?,
                    indexed_at: Self::parse_timestamp(&indexed_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sources)
    }

    async fn has_source(&self, source_id: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let found = conn
            .query_row(
                "SELECT 1 FROM records WHERE collection = ?1 AND source_id = ?2 LIMIT 1",
                params![self.collection, source_id],
                |_| Ok(()),
            )
            .optional()?;

        Ok(found.is_some())
    }

    #[instrument(skip(self))]
    async fn get_by_source(&self, source_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE collection = ?1 AND source_id = ?2 ORDER BY position",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![self.collection, source_id], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Found {} records for source {}", records.len(), source_id);
        Ok(records)
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let count: usize = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![self.collection],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let dimension: Option<usize> = conn.query_row(
            "SELECT dimension FROM collections WHERE name = ?1",
            params![self.collection],
            |row| row.get(0),
        )?;
        Ok(dimension)
    }

    async fn set_dimension(&self, dimension: usize) -> Result<()> {
        let conn = self.conn.lock().map_err(lock_error)?;

        conn.execute(
            "UPDATE collections SET dimension = ?2 WHERE name = ?1",
            params![self.collection, dimension],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.unchecked_transaction()?;

        let deleted = tx.execute(
            "DELETE FROM records WHERE collection = ?1",
            params![self.collection],
        )?;
        tx.execute(
            "UPDATE collections SET dimension = NULL WHERE name = ?1",
            params![self.collection],
        )?;
        tx.commit()?;

        info!("Cleared {} records from {}", deleted, self.collection);
        Ok(deleted)
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(lock_error)?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        debug!("Checkpointed collection {}", self.collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::test_support::record;

    #[tokio::test]
    async fn test_sqlite_vector_store() {
        let store = SqliteVectorStore::in_memory("test").unwrap();

        store
            .upsert_batch(&[record("guide.md", 0, "This is test content", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let sources = store.list_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_id, "guide.md");
        assert_eq!(sources[0].title.as_deref(), Some("Title of guide.md"));

        let results = store.search(&[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 0.001);
        assert_eq!(results[0].chunk.text, "This is test content");

        let deleted = store.delete_by_source("guide.md").await.unwrap();
        assert_eq!(deleted, 1);

        assert!(store.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_fields_survive_storage() {
        let store = SqliteVectorStore::in_memory("test").unwrap();
        let original = record("notes.txt", 4, "Grüße, überall", vec![0.25, -0.5]);
        store.upsert_batch(&[original.clone()]).await.unwrap();

        let stored = store.get_by_source("notes.txt").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].chunk, original.chunk);
        assert_eq!(stored[0].embedding, vec![0.25, -0.5]);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let first = SqliteVectorStore::open(&path, "first").unwrap();
        let second = SqliteVectorStore::open(&path, "second").unwrap();
        first.upsert_batch(&[record("a.md", 0, "a", vec![1.0])]).await.unwrap();

        assert_eq!(first.count().await.unwrap(), 1);
        assert_eq!(second.count().await.unwrap(), 0);
        assert!(second.search(&[1.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");

        {
            let store = SqliteVectorStore::open(&path, "docs").unwrap();
            store.set_dimension(2).await.unwrap();
            store
                .upsert_batch(&[
                    record("a.md", 0, "first", vec![1.0, 0.0]),
                    record("a.md", 1, "second", vec![0.0, 1.0]),
                ])
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let store = SqliteVectorStore::open(&path, "docs").unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.dimension().await.unwrap(), Some(2));

        let results = store.search(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(results[0].chunk.id(), "a.md#1");
    }

    #[tokio::test]
    async fn test_clear_resets_dimension() {
        let store = SqliteVectorStore::in_memory("docs").unwrap();
        store.set_dimension(3).await.unwrap();
        store.upsert_batch(&[record("a.md", 0, "a", vec![1.0, 0.0, 0.0])]).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.dimension().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_source_swaps_records() {
        let store = SqliteVectorStore::in_memory("docs").unwrap();
        store
            .upsert_batch(&[
                record("a.md", 0, "old zero", vec![1.0, 0.0]),
                record("a.md", 1, "old one", vec![0.0, 1.0]),
                record("b.md", 0, "other", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let removed = store
            .replace_source("a.md", &[record("a.md", 0, "new zero", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(removed, 2);
        let a = store.get_by_source("a.md").await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].chunk.text, "new zero");
        assert_eq!(store.get_by_source("b.md").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_old_records() {
        let store = SqliteVectorStore::in_memory("docs").unwrap();
        store
            .upsert_batch(&[
                record("a.md", 0, "old zero", vec![1.0, 0.0]),
                record("a.md", 1, "old one", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        // Make the insert fail after the delete has run inside the transaction.
        store
            .conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_write BEFORE INSERT ON records
                 WHEN NEW.content = 'unwritable'
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
            .unwrap();

        let result = store
            .replace_source(
                "a.md",
                &[
                    record("a.md", 0, "new zero", vec![1.0, 0.0]),
                    record("a.md", 1, "unwritable", vec![0.0, 1.0]),
                ],
            )
            .await;

        assert!(result.is_err());
        let kept = store.get_by_source("a.md").await.unwrap();
        let texts: Vec<&str> = kept.iter().map(|r| r.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["old zero", "old one"]);
    }
}
