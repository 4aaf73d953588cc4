//! External capability interfaces.
//!
//! The assistant consumes two opaque capabilities: an embedding producer
//! (text in, fixed-length vector out) and a language model (prompt plus
//! tool schemas in, either structured tool calls or an answer out, with
//! token streaming for synthesis). [`openai`] binds both to any
//! OpenAI-compatible HTTP API; tests substitute scripted implementations.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;

pub mod openai;

pub use openai::OpenAiClient;

#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    #[error("capability request failed: {message}")]
    #[diagnostic(
        code(debatesmith::providers::transport),
        help("check OPENAI_BASE_URL and network reachability")
    )]
    Transport { message: String },

    #[error("capability returned status {status}: {message}")]
    #[diagnostic(code(debatesmith::providers::status))]
    Status { status: u16, message: String },

    #[error("capability response was malformed: {message}")]
    #[diagnostic(code(debatesmith::providers::decode))]
    Decode { message: String },

    #[error("embedding batch mismatch: sent {requested} texts, received {received} vectors")]
    #[diagnostic(code(debatesmith::providers::embedding_count))]
    EmbeddingCount { requested: usize, received: usize },

    #[error("embedding dimension mismatch: expected {expected}, received {received}")]
    #[diagnostic(
        code(debatesmith::providers::embedding_dim),
        help("DEBATESMITH_EMBEDDING_DIM must match the model's output size")
    )]
    EmbeddingDim { expected: usize, received: usize },
}

impl ProviderError {
    /// Transient failures are worth a retry; the rest abort the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

/// A message as presented to the language model, including tool plumbing.
///
/// Unlike [`Message`], prompt messages can carry the model's own tool
/// calls and the ids tying tool results back to them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl PromptMessage {
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::plain(Message::SYSTEM, content)
    }

    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::plain(Message::USER, content)
    }

    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::plain(Message::ASSISTANT, content)
    }

    /// The assistant turn that requested tool calls.
    #[must_use]
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Message::ASSISTANT.to_string(),
            content: None,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// A tool result answering the call with id `call_id`.
    #[must_use]
    pub fn tool_result(call_id: &str, content: &str) -> Self {
        Self {
            role: Message::TOOL.to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.to_string()),
        }
    }

    fn plain(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

impl From<&Message> for PromptMessage {
    fn from(message: &Message) -> Self {
        Self::plain(&message.role, &message.content)
    }
}

/// Schema of one tool offered to the model.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// One tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Parsed arguments. When the model emitted unparseable JSON this is
    /// the raw string, and dispatch reports it as a failed call.
    pub arguments: serde_json::Value,
}

/// What the model decided during a planning step.
#[derive(Debug)]
pub enum PlanOutcome {
    /// More evidence wanted.
    ToolCalls(Vec<ToolCallRequest>),
    /// Enough evidence; this is the answer text.
    Answer(String),
}

/// Ordered increments of a streamed answer.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Language-generation capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One planning step: given history and tool schemas, decide between
    /// requesting tools and answering outright.
    async fn plan(
        &self,
        history: &[PromptMessage],
        tools: &[ToolSpec],
    ) -> Result<PlanOutcome, ProviderError>;

    /// Streamed completion with no tools offered, for synthesis.
    async fn stream_answer(&self, history: &[PromptMessage]) -> Result<TokenStream, ProviderError>;

    /// Unstreamed completion, for summarization.
    async fn complete(&self, history: &[PromptMessage]) -> Result<String, ProviderError>;
}

/// Embedding capability. Deterministic for identical input and pinned to
/// one model version per index.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded in the index to prevent mixing vector spaces.
    fn model_id(&self) -> &str;
    /// Output dimensionality.
    fn dimensions(&self) -> usize;
    /// Embeds a batch, one vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}
