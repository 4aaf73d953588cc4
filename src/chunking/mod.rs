//! Turns parsed debates into retrieval-ready chunks.
//!
//! The pipeline here is: count tokens ([`tokens`]), condense oversized
//! utterances ([`summary`]), then assemble budgeted chunks with sentence
//! overlap and question/answer pairing ([`chunker`]). Chunk assembly itself
//! is pure and synchronous; only summarization talks to a model.

pub mod chunker;
pub mod summary;
pub mod tokens;

pub use chunker::{ChunkerConfig, ContextualChunker, DebateChunk};
pub use summary::{Summarizer, SummaryCache, SummaryError};
pub use tokens::{TokenCounter, TokenizerError};
