//! Token counting for chunk budgets.

use miette::Diagnostic;
use thiserror::Error;
use tiktoken_rs::CoreBPE;

#[derive(Debug, Error, Diagnostic)]
pub enum TokenizerError {
    #[error("tokenizer initialization failed: {message}")]
    #[diagnostic(code(debatesmith::chunking::tokenizer))]
    Init { message: String },
}

/// Shared token counter backed by the `cl100k_base` encoding.
///
/// Construction loads the embedded BPE ranks and is not cheap; build one
/// and share it (the pipeline wraps it in an `Arc`).
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    pub fn new() -> Result<Self, TokenizerError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|err| TokenizerError::Init {
            message: err.to_string(),
        })?;
        Ok(Self { bpe })
    }

    /// Number of tokens in `text`.
    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}
