//! Docent - Question answering over your own documents
//!
//! A local-first CLI tool for indexing private document collections and
//! answering questions about them with cited, streamed responses.
//!
//! # Overview
//!
//! Docent allows you to:
//! - Split plain-text and markdown documents into overlapping chunks
//! - Embed and store those chunks in a persistent SQLite index
//! - Retrieve the most relevant chunks for a question
//! - Stream an answer from a local or hosted language model, with sources
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management and prompt templates
//! - `source` - Loading documents from the filesystem
//! - `chunking` - Recursive character splitting with overlap
//! - `embedding` - Embedding backends (Ollama, OpenAI, feature hashing)
//! - `vector_store` - Vector storage abstraction
//! - `index` - Batched ingestion and similarity search
//! - `generation` - Streaming text generation backends
//! - `rag` - Context assembly and answer generation
//! - `orchestrator` - Pipeline coordination
//!
//! # Example
//!
//! ```rust,no_run
//! use docent::config::Settings;
//! use docent::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings).await?;
//!
//!     orchestrator.ingest_paths(&["notes/".into()], false).await?;
//!
//!     let response = orchestrator
//!         .rag_engine()
//!         .ask("How do loops work?", None)
//!         .await?;
//!     println!("{}", response.format_for_display());
//!
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod ollama;
pub mod openai;
pub mod orchestrator;
pub mod rag;
pub mod source;
pub mod vector_store;

#[cfg(test)]
mod testing;

pub use error::{DocentError, Result};
