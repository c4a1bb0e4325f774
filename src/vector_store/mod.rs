//! Vector store abstraction for docent.
//!
//! Provides a trait-based interface for different vector database backends.
//! Search is exact: every stored record is scored against the query.

mod memory;
mod sqlite;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use crate::chunking::Chunk;
use crate::error::{DocentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A chunk together with its embedding, as persisted in a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// The embedded chunk, including its provenance.
    pub chunk: Chunk,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// When this record was indexed.
    pub indexed_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            chunk,
            embedding,
            indexed_at: Utc::now(),
        }
    }

    /// Storage key of the record.
    pub fn id(&self) -> String {
        self.chunk.id()
    }
}

/// A search result with score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// The matched chunk.
    pub chunk: Chunk,
    /// Cosine similarity in [-1, 1] (higher is better).
    pub score: f32,
}

/// Summary information about an indexed source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedSource {
    pub source_id: String,
    pub title: Option<String>,
    /// Number of indexed chunks.
    pub chunk_count: usize,
    /// Total characters covered (end offset of the last chunk).
    pub total_chars: usize,
    /// When the source was last indexed.
    pub indexed_at: DateTime<Utc>,
}

/// Trait for vector store implementations.
///
/// A store instance serves one named collection whose vector dimension is fixed
/// once set.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records, keyed by chunk identity.
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<usize>;

    /// Return the `limit` records most similar to the query, ranked.
    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>>;

    /// Delete all records of a source, returning how many were removed.
    async fn delete_by_source(&self, source_id: &str) -> Result<usize>;

    /// Atomically swap every record of a source for `records`.
    ///
    /// Either the old records are all gone and the new ones all stored, or
    /// nothing changed. Returns how many old records were removed.
    async fn replace_source(&self, source_id: &str, records: &[EmbeddingRecord]) -> Result<usize>;

    /// List indexed sources, most recently indexed first.
    async fn list_sources(&self) -> Result<Vec<IndexedSource>>;

    /// Check if a source has any records.
    async fn has_source(&self, source_id: &str) -> Result<bool>;

    /// Records of one source, ordered by position.
    async fn get_by_source(&self, source_id: &str) -> Result<Vec<EmbeddingRecord>>;

    /// Number of records in the collection.
    async fn count(&self) -> Result<usize>;

    /// Vector dimension of the collection, if one has been fixed.
    async fn dimension(&self) -> Result<Option<usize>>;

    /// Fix the vector dimension of the collection.
    async fn set_dimension(&self, dimension: usize) -> Result<()>;

    /// Drop every record and forget the dimension, returning the number removed.
    async fn clear(&self) -> Result<usize>;

    /// Flush pending writes.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Compute cosine similarity between two vectors, clamped to [-1, 1].
///
/// Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Order results by score descending, then position and source ascending, and keep `limit`.
pub fn rank(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.position.cmp(&b.chunk.position))
            .then_with(|| a.chunk.source_id.cmp(&b.chunk.source_id))
    });
    results.truncate(limit);
    results
}

/// Error for a poisoned store lock.
pub(crate) fn lock_error<E: std::fmt::Display>(e: E) -> DocentError {
    DocentError::VectorStore(format!("Failed to acquire lock: {}", e))
}


#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_breaks_ties_by_position_then_source() {
        let results = vec![
            SearchResult { chunk: record("b.md", 2, "x", vec![]).chunk, score: 0.5 },
            SearchResult { chunk: record("b.md", 0, "x", vec![]).chunk, score: 0.5 },
            SearchResult { chunk: record("a.md", 0, "x", vec![]).chunk, score: 0.5 },
            SearchResult { chunk: record("c.md", 9, "x", vec![]).chunk, score: 0.9 },
        ];

        let ranked = rank(results, 3);
        let ids: Vec<String> = ranked.iter().map(|r| r.chunk.id()).collect();
        assert_eq!(ids, vec!["c.md#9", "a.md#0", "b.md#0"]);
    }

    #[test]
    fn test_record_id_is_chunk_identity() {
        assert_eq!(record("guide.md", 3, "text", vec![1.0]).id(), "guide.md#3");
    }
}
