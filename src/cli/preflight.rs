//! Pre-flight checks before expensive operations.
//!
//! Validates that required configuration is available before starting
//! operations that would otherwise fail midway.

use crate::config::{EmbeddingProvider, GenerationProvider, Settings};
use crate::error::{DocentError, Result};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Ingestion needs the embedding backend.
    Ingest,
    /// Asking needs the embedding and generation backends.
    Ask,
    /// Search needs the embedding backend.
    Search,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    let embedding = &settings.embedding;
    match embedding.provider {
        EmbeddingProvider::OpenAI => check_api_key()?,
        EmbeddingProvider::Ollama => check_url("embedding.base_url", &embedding.base_url)?,
        EmbeddingProvider::Hashing => {}
    }

    if let Operation::Ask = operation {
        match settings.generation.provider {
            GenerationProvider::OpenAI => check_api_key()?,
            GenerationProvider::Ollama => check_url("generation.base_url", &settings.generation.base_url)?,
        }
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(DocentError::InvalidConfiguration(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(DocentError::InvalidConfiguration(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

fn check_url(key: &str, value: &str) -> Result<()> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(DocentError::InvalidConfiguration(format!(
            "{} must use http or https, got '{}'",
            key,
            url.scheme()
        ))),
        Err(e) => Err(DocentError::InvalidConfiguration(format!(
            "{} '{}' is not a valid URL: {}",
            key, value, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_search_has_no_requirements() {
        let mut settings = Settings::default();
        settings.embedding.provider = EmbeddingProvider::Hashing;
        assert!(check(Operation::Search, &settings).is_ok());
    }

    #[test]
    fn test_default_ollama_urls_pass() {
        assert!(check(Operation::Ask, &Settings::default()).is_ok());
    }

    #[test]
    fn test_bad_generation_url_fails_only_for_ask() {
        let mut settings = Settings::default();
        settings.generation.base_url = "ftp://example.com".to_string();

        assert!(check(Operation::Ingest, &settings).is_ok());
        assert!(matches!(
            check(Operation::Ask, &settings),
            Err(DocentError::InvalidConfiguration(_))
        ));
    }
}
