//! RAG query pipeline: retrieve, assemble, generate.

use super::context::{assemble, Citation};
use super::generation::{AnswerStream, GenerationCoordinator};
use crate::error::{DocentError, Result};
use crate::index::EmbeddingIndex;
use crate::vector_store::SearchResult;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

/// RAG engine for question answering.
///
/// One query flows at a time: the permit taken before retrieval travels with
/// the answer stream and is released when the stream ends or is dropped.
pub struct RagEngine {
    index: Arc<EmbeddingIndex>,
    coordinator: GenerationCoordinator,
    default_k: usize,
    max_context_chars: usize,
    gate: Arc<Semaphore>,
}

/// A started query: the streaming answer plus its provenance.
pub struct QueryResponse {
    pub answer: AnswerStream,
    /// Ranked retrieval results, before budgeting.
    pub results: Vec<SearchResult>,
    /// Sources that contributed to the context, in first-contribution order.
    pub sources: Vec<String>,
    pub citations: Vec<Citation>,
    pub grounded: bool,
}

/// A completed answer with sources.
#[derive(Debug, Clone)]
pub struct RagResponse {
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub grounded: bool,
}

impl RagEngine {
    pub fn new(index: Arc<EmbeddingIndex>, coordinator: GenerationCoordinator) -> Self {
        Self {
            index,
            coordinator,
            default_k: 5,
            max_context_chars: 6000,
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Set the number of chunks retrieved when the caller does not ask for a count.
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    /// Set the context budget in characters.
    pub fn with_max_context_chars(mut self, max_chars: usize) -> Self {
        self.max_context_chars = max_chars;
        self
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Retrieve context for `question` and start streaming an answer.
    #[instrument(skip(self), fields(question = %question))]
    pub async fn query(&self, question: &str, k: Option<usize>) -> Result<QueryResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DocentError::InvalidInput("question is empty".to_string()));
        }

        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DocentError::InvalidConfiguration(format!("query gate closed: {}", e)))?;

        let k = k.unwrap_or(self.default_k);
        let results = self.index.search(question, k).await?;
        let context = assemble(&results, self.max_context_chars);

        info!(
            "Retrieved {} chunks, {} in context from {} sources",
            results.len(),
            context.spans.len(),
            context.sources.len()
        );

        let answer = self.coordinator.answer(question, &context).with_permit(permit);
        let grounded = answer.is_grounded();

        Ok(QueryResponse {
            answer,
            results,
            sources: context.sources,
            citations: context.citations,
            grounded,
        })
    }

    /// Ask a question and wait for the whole answer.
    pub async fn ask(&self, question: &str, k: Option<usize>) -> Result<RagResponse> {
        let response = self.query(question, k).await?;
        let answer = response.answer.collect_text().await?;

        Ok(RagResponse {
            question: question.trim().to_string(),
            answer,
            citations: response.citations,
            grounded: response.grounded,
        })
    }
}

/// Render citations as a list of sources with chunk positions and relevance.
pub fn format_sources(citations: &[Citation]) -> String {
    let mut output = String::from("Sources:");
    for citation in citations {
        let positions: Vec<String> = citation.positions.iter().map(|p| p.to_string()).collect();
        output.push_str(&format!(
            "\n- {} (chunks: {}, relevance: {:.2}%)",
            citation.display_name(),
            positions.join(", "),
            citation.avg_score * 100.0
        ));
    }
    output
}

impl RagResponse {
    /// Format the response for display.
    pub fn format_for_display(&self) -> String {
        let mut output = format!("Question: {}\n\nAnswer: {}", self.question, self.answer);

        if self.grounded && !self.citations.is_empty() {
            output.push_str("\n\n");
            output.push_str(&format_sources(&self.citations));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{split, Document};
    use crate::config::Prompts;
    use crate::embedding::HashingEmbedder;
    use crate::generation::GenerationBackend;
    use crate::index::IndexOptions;
    use crate::rag::generation::GenerationState;
    use crate::testing::{programming_guide, ScriptedBackend};
    use crate::vector_store::MemoryVectorStore;
    use futures::StreamExt;
    use std::time::Duration;

    async fn engine(backend: Arc<ScriptedBackend>) -> RagEngine {
        let index = EmbeddingIndex::open(
            Arc::new(HashingEmbedder::new(4096)),
            Arc::new(MemoryVectorStore::new()),
            IndexOptions::default(),
        )
        .await
        .unwrap();

        let text = programming_guide().join("\n\n");
        let chunks = split(&Document::new("guide.md", Some("Guide".to_string()), text), 250, 20).unwrap();
        index.ingest(&chunks).await.unwrap();

        let backend: Arc<dyn GenerationBackend> = backend;
        RagEngine::new(
            Arc::new(index),
            GenerationCoordinator::new(backend, Prompts::default(), Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn test_query_streams_grounded_answer() {
        let backend = Arc::new(ScriptedBackend::new(&["Loops ", "repeat."]));
        let engine = engine(backend.clone()).await;

        let response = engine.query("how do loops work", Some(2)).await.unwrap();
        assert!(response.grounded);
        assert_eq!(response.sources, vec!["guide.md"]);
        assert_eq!(response.results[0].chunk.position, 0);

        let answer = response.answer.collect_text().await.unwrap();
        assert_eq!(answer, "Loops repeat.");
        assert!(backend.last_request().unwrap().prompt.contains("for loop"));
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let engine = engine(Arc::new(ScriptedBackend::new(&[]))).await;
        assert!(matches!(
            engine.query("   ", None).await,
            Err(DocentError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_index_gives_ungrounded_answer() {
        let backend = Arc::new(ScriptedBackend::new(&["invented"]));
        let index = EmbeddingIndex::open(
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(MemoryVectorStore::new()),
            IndexOptions::default(),
        )
        .await
        .unwrap();
        let engine = RagEngine::new(
            Arc::new(index),
            GenerationCoordinator::new(backend.clone(), Prompts::default(), Duration::from_secs(5)),
        );

        let response = engine.ask("What is the capital of Mars?", None).await.unwrap();
        assert!(!response.grounded);
        assert!(response.answer.contains("sufficient information"));
        assert!(!response.format_for_display().contains("Sources:"));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_next_query_waits_for_previous_answer() {
        let backend = Arc::new(ScriptedBackend::new(&["a", "b"]).with_token_delay(Duration::from_secs(10)));
        let engine = engine(backend.clone()).await;

        let mut first = engine.query("loops", None).await.unwrap();
        assert_eq!(first.answer.next().await.unwrap().unwrap(), "a");

        let blocked = tokio::time::timeout(Duration::from_millis(50), engine.query("functions", None)).await;
        assert!(blocked.is_err(), "second query ran while the first was streaming");

        first.answer.cancel_handle().cancel();
        assert!(first.answer.next().await.is_none());
        assert_eq!(first.answer.state(), GenerationState::Cancelled);

        let second = tokio::time::timeout(Duration::from_secs(1), engine.query("functions", None)).await;
        assert!(second.is_ok());
    }

    #[test]
    fn test_format_sources() {
        let citations = vec![Citation {
            source_id: "guide.md".to_string(),
            title: Some("Guide".to_string()),
            positions: vec![0, 2],
            avg_score: 0.8312,
        }];

        assert_eq!(
            format_sources(&citations),
            "Sources:\n- Guide (chunks: 0, 2, relevance: 83.12%)"
        );
    }
}
