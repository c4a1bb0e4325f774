//! RAG (Retrieval-Augmented Generation) for question answering with sources.
//!
//! Retrieval results are packed into a bounded context block, which the
//! generation coordinator turns into a streamed, cancellable answer.

pub mod context;
pub mod generation;
mod response;

pub use context::{assemble, AssembledContext, Citation, ContextSpan, CONTEXT_DELIMITER};
pub use generation::{AnswerStream, CancelHandle, GenerationCoordinator, GenerationState};
pub use response::{format_sources, QueryResponse, RagEngine, RagResponse};
