//! Ollama embeddings implementation.

use super::Embedder;
use crate::error::{DocentError, Result};
use crate::ollama::{describe_failure, OllamaClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Embedder backed by a local Ollama server (`/api/embed`).
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Create an embedder for `model` served at `base_url`.
    pub fn new(base_url: &str, model: &str, dimensions: usize) -> Result<Self> {
        Ok(Self {
            client: OllamaClient::new(base_url)?,
            model: model.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    #[instrument(skip(self, text))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| DocentError::Embedding("Empty embedding response".to_string()))
    }

    #[instrument(skip(self, texts), fields(count = texts.len(), model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.client.endpoint("api/embed")?;
        let response = self
            .client
            .http()
            .post(url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| DocentError::EmbeddingBackendUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DocentError::EmbeddingBackendUnavailable(
                describe_failure(response).await,
            ));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| DocentError::Embedding(format!("Malformed embedding response: {}", e)))?;

        if body.embeddings.len() != texts.len() {
            return Err(DocentError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }

        debug!("Generated {} embeddings", body.embeddings.len());
        Ok(body.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let json = serde_json::to_value(EmbedRequest {
            model: "all-minilm",
            input: &input,
        })
        .unwrap();

        assert_eq!(json["model"], "all-minilm");
        assert_eq!(json["input"][1], "b");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_backend_unavailable() {
        // Port 9 (discard) is not an Ollama server; the connection is refused.
        let embedder = OllamaEmbedder::new("http://127.0.0.1:9", "all-minilm", 384).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, DocentError::EmbeddingBackendUnavailable(_)));
        assert!(err.is_transient());
    }
}
