//! In-memory vector store implementation.
//!
//! Useful for testing and small datasets.

use super::{cosine_similarity, lock_error, rank, EmbeddingRecord, IndexedSource, SearchResult, VectorStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory vector store.
pub struct MemoryVectorStore {
    records: RwLock<HashMap<String, EmbeddingRecord>>,
    dimension: RwLock<Option<usize>>,
}

impl MemoryVectorStore {
    /// Create a new in-memory vector store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            dimension: RwLock::new(None),
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<usize> {
        let mut store = self.records.write().map_err(lock_error)?;
        for record in records {
            store.insert(record.id(), record.clone());
        }
        Ok(records.len())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let records = self.records.read().map_err(lock_error)?;

        let results: Vec<SearchResult> = records
            .values()
            .map(|record| SearchResult {
                chunk: record.chunk.clone(),
                score: cosine_similarity(query_embedding, &record.embedding),
            })
            .collect();

        Ok(rank(results, limit))
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<usize> {
        let mut records = self.records.write().map_err(lock_error)?;
        let initial_len = records.len();
        records.retain(|_, record| record.chunk.source_id != source_id);
        Ok(initial_len - records.len())
    }

    async fn replace_source(&self, source_id: &str, records: &[EmbeddingRecord]) -> Result<usize> {
        let mut store = self.records.write().map_err(lock_error)?;
        let initial_len = store.len();
        store.retain(|_, record| record.chunk.source_id != source_id);
        let removed = initial_len - store.len();
        for record in records {
            store.insert(record.id(), record.clone());
        }
        Ok(removed)
    }

    async fn list_sources(&self) -> Result<Vec<IndexedSource>> {
        let records = self.records.read().map_err(lock_error)?;

        let mut source_map: HashMap<&str, IndexedSource> = HashMap::new();

        for record in records.values() {
            let chunk = &record.chunk;
            let entry = source_map
                .entry(chunk.source_id.as_str())
                .or_insert_with(|| IndexedSource {
                    source_id: chunk.source_id.clone(),
                    title: chunk.title.clone(),
                    chunk_count: 0,
                    total_chars: 0,
                    indexed_at: record.indexed_at,
                });

            entry.chunk_count += 1;
            entry.total_chars = entry.total_chars.max(chunk.end_offset);
            if record.indexed_at > entry.indexed_at {
                entry.indexed_at = record.indexed_at;
            }
        }

        let mut sources: Vec<IndexedSource> = source_map.into_values().collect();
        sources.sort_by(|a, b| {
            b.indexed_at
                .cmp(&a.indexed_at)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });

        Ok(sources)
    }

    async fn has_source(&self, source_id: &str) -> Result<bool> {
        let records = self.records.read().map_err(lock_error)?;
        Ok(records.values().any(|r| r.chunk.source_id == source_id))
    }

    async fn get_by_source(&self, source_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let records = self.records.read().map_err(lock_error)?;
        let mut result: Vec<EmbeddingRecord> = records
            .values()
            .filter(|r| r.chunk.source_id == source_id)
            .cloned()
            .collect();
        result.sort_by_key(|r| r.chunk.position);
        Ok(result)
    }

    async fn count(&self) -> Result<usize> {
        let records = self.records.read().map_err(lock_error)?;
        Ok(records.len())
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        Ok(*self.dimension.read().map_err(lock_error)?)
    }

    async fn set_dimension(&self, dimension: usize) -> Result<()> {
        *self.dimension.write().map_err(lock_error)? = Some(dimension);
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        let mut records = self.records.write().map_err(lock_error)?;
        let removed = records.len();
        records.clear();
        *self.dimension.write().map_err(lock_error)? = None;
        Ok(removed)
    }
}
