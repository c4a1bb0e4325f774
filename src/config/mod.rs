//! Configuration module for Docent.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{Prompts, RagPrompts};
pub use settings::{
    ChunkingSettings, EmbeddingProvider, EmbeddingSettings, EmptyContextPolicy,
    GeneralSettings, GenerationProvider, GenerationSettings, IndexSettings, PromptSettings,
    RetrievalSettings, Settings,
};
