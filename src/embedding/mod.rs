//! Embedding generation for semantic search and retrieval.

mod hashing;
mod ollama;
mod openai;

pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAIEmbedder;

use crate::config::{EmbeddingProvider, EmbeddingSettings};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Model identifier, for logs and stats.
    fn model(&self) -> &str;
}

/// Create the embedder selected in the settings.
pub fn create_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match settings.provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
            &settings.base_url,
            &settings.model,
            settings.dimensions,
        )?),
        EmbeddingProvider::OpenAI => Arc::new(OpenAIEmbedder::with_config(
            &settings.model,
            settings.dimensions,
        )?),
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(settings.dimensions)),
    };
    Ok(embedder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_embedder_by_provider() {
        let mut settings = EmbeddingSettings {
            provider: EmbeddingProvider::Hashing,
            dimensions: 64,
            ..EmbeddingSettings::default()
        };
        let embedder = create_embedder(&settings).unwrap();
        assert_eq!(embedder.dimensions(), 64);
        assert_eq!(embedder.model(), "feature-hashing");

        settings.provider = EmbeddingProvider::Ollama;
        settings.dimensions = 384;
        let embedder = create_embedder(&settings).unwrap();
        assert_eq!(embedder.model(), "all-minilm");

        settings.base_url = "not a url".to_string();
        assert!(create_embedder(&settings).is_err());
    }
}
