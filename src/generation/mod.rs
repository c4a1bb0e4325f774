//! Streaming text-generation backends.

mod ollama;
mod openai;

pub use ollama::OllamaBackend;
pub use openai::OpenAIBackend;

use crate::config::{GenerationProvider, GenerationSettings};
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Tokens produced by a backend; an `Err` item ends the stream.
///
/// Dropping the stream releases the backend connection.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A fully rendered prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Role preamble, sent as the system message.
    pub system: String,
    /// User prompt with context and question.
    pub prompt: String,
}

/// A backend that streams completion tokens for a prompt.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Start a completion; resolves once the backend has accepted the request.
    async fn stream(&self, request: &GenerationRequest) -> Result<TokenStream>;

    /// Backend and model, for logs.
    fn name(&self) -> &str;
}

/// Create the generation backend selected in the settings.
pub fn create_backend(settings: &GenerationSettings) -> Result<Arc<dyn GenerationBackend>> {
    let backend: Arc<dyn GenerationBackend> = match settings.provider {
        GenerationProvider::Ollama => Arc::new(OllamaBackend::new(
            &settings.base_url,
            &settings.model,
            settings.temperature,
        )?),
        GenerationProvider::OpenAI => Arc::new(OpenAIBackend::new(&settings.model, settings.temperature)?),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend_by_provider() {
        let mut settings = GenerationSettings::default();
        let backend = create_backend(&settings).unwrap();
        assert_eq!(backend.name(), "ollama/llama3.2");

        settings.provider = GenerationProvider::OpenAI;
        settings.model = "gpt-4o-mini".to_string();
        let backend = create_backend(&settings).unwrap();
        assert_eq!(backend.name(), "openai/gpt-4o-mini");

        settings.provider = GenerationProvider::Ollama;
        settings.base_url = "::".to_string();
        assert!(create_backend(&settings).is_err());
    }
}
