//! Embedding index: turns chunks into stored vectors and answers similarity queries.

use crate::chunking::Chunk;
use crate::config::EmbeddingSettings;
use crate::embedding::Embedder;
use crate::error::{DocentError, Result};
use crate::vector_store::{EmbeddingRecord, IndexedSource, SearchResult, VectorStore};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Batching knobs for ingestion.
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    /// Chunks per embedding request.
    pub batch_size: usize,
    /// Embedding requests in flight at once.
    pub max_concurrent: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_concurrent: 2,
        }
    }
}

impl From<&EmbeddingSettings> for IndexOptions {
    fn from(settings: &EmbeddingSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            max_concurrent: settings.max_concurrent,
        }
    }
}

/// Outcome of an ingestion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Number of chunks embedded and stored.
    pub succeeded: usize,
    /// Chunks that could not be embedded, with the reason.
    pub failed: Vec<(String, String)>,
    /// A reindex left the previous records in place because the new
    /// chunks could not all be embedded.
    pub kept_previous: bool,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: IngestReport) {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }
}

/// Collection statistics.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub count: usize,
    pub dimension: usize,
    pub model: String,
}

/// An opened collection plus the embedder that fills it.
///
/// Writes take the exclusive side of the collection gate; searches take the shared side.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    options: IndexOptions,
    gate: RwLock<()>,
}

impl EmbeddingIndex {
    /// Open the index, fixing or validating the collection's vector dimension.
    #[instrument(skip_all, fields(model = embedder.model()))]
    pub async fn open(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        options: IndexOptions,
    ) -> Result<Self> {
        if options.batch_size == 0 || options.max_concurrent == 0 {
            return Err(DocentError::InvalidConfiguration(
                "batch size and concurrency must be greater than 0".to_string(),
            ));
        }

        let expected = embedder.dimensions();
        match store.dimension().await? {
            Some(stored) if stored != expected => {
                return Err(DocentError::InvalidConfiguration(format!(
                    "collection holds {}-dimensional vectors but model {} produces {}; clear the index or change the embedding settings",
                    stored,
                    embedder.model(),
                    expected
                )));
            }
            Some(_) => {}
            None => store.set_dimension(expected).await?,
        }

        debug!("Opened index with dimension {}", expected);
        Ok(Self {
            embedder,
            store,
            options,
            gate: RwLock::new(()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed and store chunks. Re-ingesting a chunk identity overwrites it.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn ingest(&self, chunks: &[Chunk]) -> Result<IngestReport> {
        let (records, mut report) = self.embed_chunks(chunks).await?;

        let _guard = self.gate.write().await;
        report.succeeded = self.store.upsert_batch(&records).await?;

        info!(
            "Ingested {} chunks ({} failed)",
            report.succeeded,
            report.failed.len()
        );
        Ok(report)
    }

    /// Replace every record of `source_id` with `chunks`.
    ///
    /// The swap is all or nothing: if any chunk fails to embed, or the store
    /// write fails, the source keeps its previous records.
    #[instrument(skip(self, chunks), fields(chunks = chunks.len()))]
    pub async fn reindex(&self, source_id: &str, chunks: &[Chunk]) -> Result<IngestReport> {
        if let Some(stray) = chunks.iter().find(|c| c.source_id != source_id) {
            return Err(DocentError::InvalidInput(format!(
                "chunk {} does not belong to source {}",
                stray.id(),
                source_id
            )));
        }

        let (records, mut report) = self.embed_chunks(chunks).await?;
        if !report.is_complete() {
            warn!(
                "Keeping previous version of {}: {} of {} chunks failed to embed",
                source_id,
                report.failed.len(),
                chunks.len()
            );
            report.succeeded = 0;
            report.kept_previous = true;
            return Ok(report);
        }

        let _guard = self.gate.write().await;
        let removed = self.store.replace_source(source_id, &records).await?;
        report.succeeded = records.len();

        info!(
            "Reindexed {}: removed {}, stored {}",
            source_id, removed, report.succeeded
        );
        Ok(report)
    }

    /// Top `k` chunks for a query, ranked by similarity.
    #[instrument(skip(self, query))]
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(DocentError::InvalidInput(
                "number of results must be at least 1".to_string(),
            ));
        }

        let embedding = self.embedder.embed(query).await?;
        self.check_dimension(&embedding)?;

        let _guard = self.gate.read().await;
        let results = self.store.search(&embedding, k).await?;

        debug!("Search returned {} results", results.len());
        Ok(results)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let _guard = self.gate.read().await;
        Ok(IndexStats {
            count: self.store.count().await?,
            dimension: self.dimension(),
            model: self.embedder.model().to_string(),
        })
    }

    pub async fn delete_source(&self, source_id: &str) -> Result<usize> {
        let _guard = self.gate.write().await;
        self.store.delete_by_source(source_id).await
    }

    /// Number of stored chunks of one source.
    pub async fn chunk_count(&self, source_id: &str) -> Result<usize> {
        let _guard = self.gate.read().await;
        Ok(self.store.get_by_source(source_id).await?.len())
    }

    pub async fn has_source(&self, source_id: &str) -> Result<bool> {
        let _guard = self.gate.read().await;
        self.store.has_source(source_id).await
    }

    pub async fn list_sources(&self) -> Result<Vec<IndexedSource>> {
        let _guard = self.gate.read().await;
        self.store.list_sources().await
    }

    /// Drop every record; the collection keeps the current embedder's dimension.
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.gate.write().await;
        let removed = self.store.clear().await?;
        self.store.set_dimension(self.dimension()).await?;
        info!("Cleared {} records", removed);
        Ok(removed)
    }

    /// Flush the underlying store.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.gate.write().await;
        self.store.close().await
    }

    /// Embed batches concurrently, collecting records and per-chunk failures.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<(Vec<EmbeddingRecord>, IngestReport)> {
        let mut records = Vec::with_capacity(chunks.len());
        let mut report = IngestReport::default();
        if chunks.is_empty() {
            return Ok((records, report));
        }

        let batches: Vec<&[Chunk]> = chunks.chunks(self.options.batch_size).collect();
        let outcomes: Vec<Result<Vec<Vec<f32>>>> = stream::iter(batches.iter().copied())
            .map(|batch| self.embed_with_retry(batch))
            .buffered(self.options.max_concurrent)
            .collect()
            .await;

        let mut last_error = None;
        for (batch, outcome) in batches.into_iter().zip(outcomes) {
            match outcome {
                Ok(vectors) => {
                    for (chunk, vector) in batch.iter().zip(vectors) {
                        self.check_dimension(&vector)?;
                        records.push(EmbeddingRecord::new(chunk.clone(), vector));
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!("Embedding batch of {} chunks failed: {}", batch.len(), e);
                    let reason = e.to_string();
                    report.merge(IngestReport {
                        failed: batch.iter().map(|c| (c.id(), reason.clone())).collect(),
                        ..IngestReport::default()
                    });
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if records.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok((records, report))
    }

    /// Embed one batch, retrying once on a transient failure.
    async fn embed_with_retry(&self, batch: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        let vectors = match self.embedder.embed_batch(&texts).await {
            Err(e) if e.is_transient() => {
                debug!("Retrying embedding batch after: {}", e);
                self.embedder.embed_batch(&texts).await?
            }
            other => other?,
        };

        if vectors.len() != texts.len() {
            return Err(DocentError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension() {
            return Err(DocentError::InvalidConfiguration(format!(
                "embedding model returned {} dimensions, index expects {}",
                vector.len(),
                self.dimension()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{split, Document};
    use crate::embedding::HashingEmbedder;
    use crate::testing::{programming_guide, FlakyEmbedder};
    use crate::vector_store::{MemoryVectorStore, SqliteVectorStore};
    use std::sync::atomic::Ordering;

    async fn memory_index(dimensions: usize) -> EmbeddingIndex {
        EmbeddingIndex::open(
            Arc::new(HashingEmbedder::new(dimensions)),
            Arc::new(MemoryVectorStore::new()),
            IndexOptions::default(),
        )
        .await
        .unwrap()
    }

    fn guide_chunks() -> Vec<Chunk> {
        programming_guide()
            .into_iter()
            .enumerate()
            .map(|(position, text)| Chunk {
                source_id: "guide.md".to_string(),
                title: Some("Programming Guide".to_string()),
                position,
                start_offset: position * 1000,
                end_offset: position * 1000 + text.chars().count(),
                text: text.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_loops_query_ranks_loops_chunk_first() {
        let index = memory_index(4096).await;
        let report = index.ingest(&guide_chunks()).await.unwrap();
        assert_eq!(report.succeeded, 3);
        assert!(report.is_complete());

        let results = index.search("how do loops work", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.position, 0);
        assert!(results[0].score >= results[1].score);

        let results = index.search("how do loops work", 3).await.unwrap();
        let functions = results.iter().find(|r| r.chunk.position == 2).unwrap();
        assert!(results[0].score > functions.score);
    }

    #[tokio::test]
    async fn test_chunk_retrieves_itself() {
        let index = memory_index(4096).await;
        let chunks = guide_chunks();
        index.ingest(&chunks).await.unwrap();

        for chunk in &chunks {
            let results = index.search(&chunk.text, 1).await.unwrap();
            assert_eq!(results[0].chunk.id(), chunk.id());
            assert!(results[0].score > 0.99);
        }
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let index = memory_index(512).await;
        let chunks = guide_chunks();
        index.ingest(&chunks).await.unwrap();
        index.ingest(&chunks).await.unwrap();

        assert_eq!(index.stats().await.unwrap().count, chunks.len());
    }

    #[tokio::test]
    async fn test_zero_k_is_invalid() {
        let index = memory_index(64).await;
        let err = index.search("anything", 0).await.unwrap_err();
        assert!(matches!(err, DocentError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_fewer_records_than_k() {
        let index = memory_index(64).await;
        index.ingest(&guide_chunks()[..1]).await.unwrap();
        assert_eq!(index.search("loops", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_rejects_dimension_mismatch() {
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        EmbeddingIndex::open(Arc::new(HashingEmbedder::new(128)), store.clone(), IndexOptions::default())
            .await
            .unwrap();

        let result =
            EmbeddingIndex::open(Arc::new(HashingEmbedder::new(256)), store, IndexOptions::default()).await;
        assert!(matches!(result, Err(DocentError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_deleted_source_is_never_returned() {
        let index = memory_index(256).await;
        let other = split(&Document::new("other.md", None, "Loops in another document."), 100, 10).unwrap();
        index.ingest(&guide_chunks()).await.unwrap();
        index.ingest(&other).await.unwrap();

        assert_eq!(index.delete_source("guide.md").await.unwrap(), 3);
        assert!(!index.has_source("guide.md").await.unwrap());

        let results = index.search("loops", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_id, "other.md");
    }

    #[tokio::test]
    async fn test_reindex_replaces_source() {
        let index = memory_index(256).await;
        index.ingest(&guide_chunks()).await.unwrap();

        let replacement = split(&Document::new("guide.md", None, "A much shorter guide."), 100, 10).unwrap();
        let report = index.reindex("guide.md", &replacement).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(index.stats().await.unwrap().count, 1);

        let stray = split(&Document::new("other.md", None, "text"), 100, 10).unwrap();
        assert!(index.reindex("guide.md", &stray).await.is_err());
    }

    #[tokio::test]
    async fn test_partial_reindex_keeps_previous_records() {
        let embedder = Arc::new(FlakyEmbedder::rejecting("unembeddable", 64));
        let index = EmbeddingIndex::open(
            embedder,
            Arc::new(MemoryVectorStore::new()),
            IndexOptions {
                batch_size: 1,
                max_concurrent: 2,
            },
        )
        .await
        .unwrap();
        index.ingest(&guide_chunks()).await.unwrap();

        let mut replacement = guide_chunks();
        replacement[1].text = "An unembeddable rewrite of the conditionals section.".to_string();
        let report = index.reindex("guide.md", &replacement).await.unwrap();

        assert!(report.kept_previous);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "guide.md#1");

        let stored = index.chunk_count("guide.md").await.unwrap();
        assert_eq!(stored, 3);
        let results = index.search("conditionals choose between branches", 1).await.unwrap();
        assert_eq!(results[0].chunk.text, guide_chunks()[1].text);
    }

    #[tokio::test]
    async fn test_literal_loops_scenario() {
        let index = memory_index(4096).await;
        let chunks: Vec<Chunk> = [
            "Loops iterate over sequences.",
            "Conditionals branch on booleans.",
            "Functions encapsulate behavior.",
        ]
        .iter()
        .enumerate()
        .map(|(position, text)| Chunk {
            source_id: "basics.txt".to_string(),
            title: None,
            position,
            start_offset: 0,
            end_offset: text.chars().count(),
            text: text.to_string(),
        })
        .collect();
        index.ingest(&chunks).await.unwrap();

        let results = index.search("How do loops work?", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.text, "Loops iterate over sequences.");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let embedder = Arc::new(FlakyEmbedder::failing_first(64, 1));
        let index = EmbeddingIndex::open(embedder.clone(), Arc::new(MemoryVectorStore::new()), IndexOptions::default())
            .await
            .unwrap();

        let report = index.ingest(&guide_chunks()).await.unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_batches_are_reported_per_chunk() {
        let embedder = Arc::new(FlakyEmbedder::rejecting("conditional", 64));
        let index = EmbeddingIndex::open(
            embedder,
            Arc::new(MemoryVectorStore::new()),
            IndexOptions {
                batch_size: 1,
                max_concurrent: 3,
            },
        )
        .await
        .unwrap();

        let report = index.ingest(&guide_chunks()).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "guide.md#1");
        assert_eq!(index.stats().await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_total_failure_propagates() {
        let embedder = Arc::new(FlakyEmbedder::failing_first(64, usize::MAX));
        let index = EmbeddingIndex::open(embedder, Arc::new(MemoryVectorStore::new()), IndexOptions::default())
            .await
            .unwrap();

        let err = index.ingest(&guide_chunks()).await.unwrap_err();
        assert!(matches!(err, DocentError::EmbeddingBackendUnavailable(_)));
        assert_eq!(index.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_clear_keeps_index_usable() {
        let index = memory_index(128).await;
        index.ingest(&guide_chunks()).await.unwrap();

        assert_eq!(index.clear().await.unwrap(), 3);
        assert_eq!(index.stats().await.unwrap().count, 0);

        index.ingest(&guide_chunks()).await.unwrap();
        assert_eq!(index.stats().await.unwrap().count, 3);
    }

    #[tokio::test]
    async fn test_sqlite_index_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        {
            let store = Arc::new(SqliteVectorStore::open(&path, "document_embeddings").unwrap());
            let index = EmbeddingIndex::open(Arc::new(HashingEmbedder::new(1024)), store, IndexOptions::default())
                .await
                .unwrap();
            index.ingest(&guide_chunks()).await.unwrap();
            index.close().await.unwrap();
        }

        let store = Arc::new(SqliteVectorStore::open(&path, "document_embeddings").unwrap());
        let index = EmbeddingIndex::open(Arc::new(HashingEmbedder::new(1024)), store.clone(), IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(index.stats().await.unwrap().count, 3);
        assert_eq!(index.search("loops", 1).await.unwrap()[0].chunk.position, 0);

        let mismatched =
            EmbeddingIndex::open(Arc::new(HashingEmbedder::new(384)), store, IndexOptions::default()).await;
        assert!(matches!(mismatched, Err(DocentError::InvalidConfiguration(_))));
    }
}
