//! Text chunking for breaking documents into retrievable segments.
//!
//! Documents are cut at the coarsest boundary that keeps segments small enough
//! (paragraph, line, sentence, word, character) and then windowed into
//! overlapping chunks that carry their provenance.

mod splitter;

pub use splitter::TextSplitter;

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Separators in priority order: paragraph, line, sentence end, word, character.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " ", ""];

/// Plain text handed over by the document-conversion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable source identifier (file name or logical name).
    pub source_id: String,
    /// Optional human-readable title.
    pub title: Option<String>,
    /// Extracted text.
    pub text: String,
}

impl Document {
    /// Create a new document.
    pub fn new(source_id: impl Into<String>, title: Option<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title,
            text: text.into(),
        }
    }
}

/// A contiguous slice of one document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Source this chunk was cut from.
    pub source_id: String,
    /// Title of the source document.
    pub title: Option<String>,
    /// Ordinal index within the document, starting at 0.
    pub position: usize,
    /// Start offset in the source text, in characters.
    pub start_offset: usize,
    /// End offset in the source text, in characters (exclusive).
    pub end_offset: usize,
    /// Text content of this chunk.
    pub text: String,
}

impl Chunk {
    /// Stable identity used as the storage key.
    pub fn id(&self) -> String {
        chunk_id(&self.source_id, self.position)
    }

    /// Length of the text in characters.
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    /// Display label such as `guide.md #3`.
    pub fn label(&self) -> String {
        format!("{} #{}", self.title.as_deref().unwrap_or(&self.source_id), self.position)
    }
}

/// Build the identity of the chunk at `position` in `source_id`.
pub fn chunk_id(source_id: &str, position: usize) -> String {
    format!("{}#{}", source_id, position)
}

/// Configuration for chunking.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Separators in priority order.
    pub separators: Vec<String>,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<&crate::config::ChunkingSettings> for SplitterConfig {
    fn from(settings: &crate::config::ChunkingSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            separators: settings.separators.clone(),
        }
    }
}

/// Split a document with the default separators.
pub fn split(document: &Document, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let splitter = TextSplitter::new(SplitterConfig {
        chunk_size,
        chunk_overlap: overlap,
        ..SplitterConfig::default()
    })?;
    Ok(splitter.split(document))
}

/// Summary statistics over a set of chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStatistics {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub avg_chunk_size: f64,
    pub sources: usize,
}

impl ChunkStatistics {
    /// Compute statistics for the given chunks.
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        if chunks.is_empty() {
            return Self::default();
        }

        let sizes: Vec<usize> = chunks.iter().map(Chunk::char_len).collect();
        let total: usize = sizes.iter().sum();
        let mut sources: Vec<&str> = chunks.iter().map(|c| c.source_id.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();

        Self {
            total_chunks: chunks.len(),
            total_characters: total,
            min_chunk_size: sizes.iter().copied().min().unwrap_or(0),
            max_chunk_size: sizes.iter().copied().max().unwrap_or(0),
            avg_chunk_size: total as f64 / chunks.len() as f64,
            sources: sources.len(),
        }
    }
}
