//! Pipeline orchestrator for docent.
//!
//! Wires settings into the splitter, index and generation backend, and drives
//! ingestion from documents to stored embeddings.

use crate::chunking::{Chunk, ChunkStatistics, Document, SplitterConfig, TextSplitter};
use crate::config::{Prompts, Settings};
use crate::embedding::create_embedder;
use crate::error::Result;
use crate::generation::{create_backend, GenerationBackend};
use crate::index::{EmbeddingIndex, IndexOptions};
use crate::rag::{GenerationCoordinator, RagEngine};
use crate::source::{discover, load_document, SourceFile};
use crate::vector_store::SqliteVectorStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The main orchestrator for the docent pipeline.
pub struct Orchestrator {
    settings: Settings,
    prompts: Prompts,
    splitter: TextSplitter,
    index: Arc<EmbeddingIndex>,
    backend: Arc<dyn GenerationBackend>,
}

/// What happened to one document during ingestion.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    Indexed { chunks: usize, failed: usize },
    /// Already in the index and no reindex was requested.
    Skipped,
    /// No text to index.
    Empty,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub source_id: String,
    #[serde(flatten)]
    pub status: IngestStatus,
}

impl Orchestrator {
    /// Build every component from the settings, opening the persistent index.
    pub async fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;

        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let embedder = create_embedder(&settings.embedding)?;
        let store = Arc::new(SqliteVectorStore::open(
            &settings.sqlite_path(),
            &settings.index.collection,
        )?);
        let index = EmbeddingIndex::open(embedder, store, IndexOptions::from(&settings.embedding)).await?;
        let backend = create_backend(&settings.generation)?;

        info!(
            "Using {} embeddings ({}) and {} for generation",
            settings.embedding.provider,
            settings.embedding.model,
            backend.name()
        );

        Self::with_components(settings, prompts, Arc::new(index), backend)
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(
        settings: Settings,
        prompts: Prompts,
        index: Arc<EmbeddingIndex>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Result<Self> {
        let splitter = TextSplitter::new(SplitterConfig::from(&settings.chunking))?;

        Ok(Self {
            settings,
            prompts,
            splitter,
            index,
            backend,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Split a document with the configured chunk size and overlap.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.splitter.split(document)
    }

    /// Build a query engine over the index.
    pub fn rag_engine(&self) -> RagEngine {
        let coordinator = GenerationCoordinator::new(
            self.backend.clone(),
            self.prompts.clone(),
            self.settings.generation.timeout(),
        )
        .with_empty_context_policy(self.settings.generation.empty_context);

        RagEngine::new(self.index.clone(), coordinator)
            .with_default_k(self.settings.retrieval.default_k)
            .with_max_context_chars(self.settings.retrieval.max_context_chars)
    }

    /// Chunk and index one document.
    ///
    /// A source that is already indexed is skipped unless `reindex` is set, in
    /// which case its previous chunks are replaced. A source whose stored chunk
    /// count no longer matches the document, e.g. after a partial ingest, is
    /// replaced as well.
    #[instrument(skip(self, document), fields(source = %document.source_id))]
    pub async fn ingest_document(&self, document: &Document, reindex: bool) -> Result<IngestOutcome> {
        let source_id = document.source_id.clone();
        let stored = self.index.chunk_count(&source_id).await?;

        let chunks = self.chunk(document);
        if stored > 0 && !reindex {
            if stored == chunks.len() {
                info!("{} is already indexed, skipping", source_id);
                return Ok(IngestOutcome {
                    source_id,
                    status: IngestStatus::Skipped,
                });
            }
            info!(
                "{} has {} stored chunks but {} expected, replacing",
                source_id,
                stored,
                chunks.len()
            );
        }

        if chunks.is_empty() {
            warn!("{} has no text to index", source_id);
            return Ok(IngestOutcome {
                source_id,
                status: IngestStatus::Empty,
            });
        }

        let stats = ChunkStatistics::from_chunks(&chunks);
        debug!(
            "{} chunks, {}-{} chars (avg {:.0})",
            stats.total_chunks, stats.min_chunk_size, stats.max_chunk_size, stats.avg_chunk_size
        );

        let report = if stored > 0 {
            self.index.reindex(&source_id, &chunks).await?
        } else {
            self.index.ingest(&chunks).await?
        };

        for (chunk_id, reason) in &report.failed {
            warn!("Chunk {} was not indexed: {}", chunk_id, reason);
        }

        let status = if report.kept_previous {
            IngestStatus::Failed {
                reason: format!(
                    "{} of {} chunks failed to embed; previous version kept",
                    report.failed.len(),
                    chunks.len()
                ),
            }
        } else {
            IngestStatus::Indexed {
                chunks: report.succeeded,
                failed: report.failed.len(),
            }
        };

        Ok(IngestOutcome { source_id, status })
    }

    /// Load and ingest one file.
    ///
    /// Unreadable files and transient backend failures become a `Failed`
    /// outcome; store errors fail the call.
    pub async fn ingest_file(&self, file: &SourceFile, reindex: bool) -> Result<IngestOutcome> {
        let document = match load_document(file) {
            Ok(document) => document,
            Err(e) => {
                warn!("Skipping {}: {}", file.path.display(), e);
                return Ok(IngestOutcome {
                    source_id: file.source_id.clone(),
                    status: IngestStatus::Failed {
                        reason: e.to_string(),
                    },
                });
            }
        };

        match self.ingest_document(&document, reindex).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_transient() => Ok(IngestOutcome {
                source_id: document.source_id.clone(),
                status: IngestStatus::Failed {
                    reason: e.to_string(),
                },
            }),
            Err(e) => Err(e),
        }
    }

    /// Load and ingest every document under the given paths.
    ///
    /// Per-document failures are reported in the outcomes; only problems with
    /// the paths themselves or the index fail the whole call.
    pub async fn ingest_paths(&self, paths: &[PathBuf], reindex: bool) -> Result<Vec<IngestOutcome>> {
        let files = discover(paths)?;
        info!("Found {} documents", files.len());

        let mut outcomes = Vec::with_capacity(files.len());
        for file in &files {
            outcomes.push(self.ingest_file(file, reindex).await?);
        }

        Ok(outcomes)
    }

    /// Flush the index to disk.
    pub async fn close(&self) -> Result<()> {
        self.index.close().await
    }
}
