//! Stats command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::vector_store::IndexedSource;
use anyhow::Result;

/// Run the stats command.
pub async fn run_stats(settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings).await?;
    let stats = orchestrator.index().stats().await?;
    let sources = orchestrator.index().list_sources().await?;
    let settings = orchestrator.settings();

    Output::header("Index");
    Output::kv("Collection", &settings.index.collection);
    Output::kv("Database", &settings.sqlite_path().display().to_string());
    Output::kv("Documents", &sources.len().to_string());
    Output::kv("Chunks", &stats.count.to_string());
    Output::kv("Embedding model", &stats.model);
    Output::kv("Dimension", &stats.dimension.to_string());

    if !sources.is_empty() {
        Output::header("Chunks per document");
        for (source_id, chunks) in chunk_count_rows(&sources) {
            Output::kv(source_id, &chunks);
        }
    }

    Output::header("Chunking");
    Output::kv("Chunk size", &settings.chunking.chunk_size.to_string());
    Output::kv("Overlap", &settings.chunking.chunk_overlap.to_string());
    println!();

    Ok(())
}

fn chunk_count_rows(sources: &[IndexedSource]) -> Vec<(&str, String)> {
    sources
        .iter()
        .map(|s| {
            let unit = if s.chunk_count == 1 { "chunk" } else { "chunks" };
            (s.source_id.as_str(), format!("{} {}", s.chunk_count, unit))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Document;
    use crate::config::Prompts;
    use crate::embedding::HashingEmbedder;
    use crate::index::{EmbeddingIndex, IndexOptions};
    use crate::testing::{programming_guide, ScriptedBackend};
    use crate::vector_store::MemoryVectorStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rows_report_chunks_for_each_document() {
        let mut settings = Settings::default();
        settings.chunking.chunk_size = 200;
        settings.chunking.chunk_overlap = 40;
        let index = EmbeddingIndex::open(
            Arc::new(HashingEmbedder::new(256)),
            Arc::new(MemoryVectorStore::new()),
            IndexOptions::default(),
        )
        .await
        .unwrap();
        let orchestrator = Orchestrator::with_components(
            settings,
            Prompts::default(),
            Arc::new(index),
            Arc::new(ScriptedBackend::new(&[])),
        )
        .unwrap();

        let guide = Document::new("guide.md", None, programming_guide().join("\n\n"));
        let expected = orchestrator.chunk(&guide).len();
        orchestrator.ingest_document(&guide, false).await.unwrap();
        orchestrator
            .ingest_document(&Document::new("loops.txt", None, "Loops repeat code."), false)
            .await
            .unwrap();

        let sources = orchestrator.index().list_sources().await.unwrap();
        let mut rows = chunk_count_rows(&sources);
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("guide.md", format!("{} chunks", expected)),
                ("loops.txt", "1 chunk".to_string()),
            ]
        );
    }
}
