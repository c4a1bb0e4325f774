//! Error types for Docent.

use std::time::Duration;
use thiserror::Error;

/// Library-level error type for Docent operations.
#[derive(Error, Debug)]
pub enum DocentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Embedding backend unavailable: {0}")]
    EmbeddingBackendUnavailable(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Generation timed out: no token received within {}s", .0.as_secs_f64())]
    GenerationTimeout(Duration),

    #[error("Generation backend error: {0}")]
    GenerationBackend(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl DocentError {
    /// Whether the failure may go away on a retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DocentError::EmbeddingBackendUnavailable(_)
                | DocentError::Embedding(_)
                | DocentError::Http(_)
        )
    }
}

/// Result type alias for Docent operations.
pub type Result<T> = std::result::Result<T, DocentError>;
