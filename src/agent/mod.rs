//! The research agent: a tool-calling loop over the record stores.
//!
//! A turn moves through explicit phases. The model plans, requested tools
//! run one by one in the order the model emitted them, and once the model
//! declares it has enough evidence (or the per-turn tool budget runs out)
//! the answer is synthesized as a token stream. Tool failures never abort a
//! turn; they come back to the model as payloads describing the gap, and
//! the final answer says what is missing.

use miette::Diagnostic;
use thiserror::Error;

use crate::providers::ProviderError;
use crate::store::StoreError;

pub mod orchestrator;
pub mod prompt;
pub mod tools;

pub use orchestrator::{Orchestrator, TurnEvent, TurnResult};
pub use tools::{ToolContext, ToolKind, ToolOutcome, tool_specs};

/// Failures that end a turn early. Everything else (bad tool arguments,
/// ambiguous names, failed lookups) is reported to the model as evidence.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error(transparent)]
    #[diagnostic(code(debatesmith::agent::capability))]
    Capability(#[from] ProviderError),

    #[error(transparent)]
    #[diagnostic(code(debatesmith::agent::store))]
    Store(#[from] StoreError),
}
