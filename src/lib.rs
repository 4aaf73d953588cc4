//! # Debatesmith: Parliamentary Debate Research Assistant
//!
//! Debatesmith ingests UK parliamentary debate transcripts and division
//! metadata into a local SQLite index, then answers questions over that
//! corpus with an evidence-gathering agent that cites every claim back to
//! a speaker, date, and party.
//!
//! ## Core Concepts
//!
//! - **Chunks**: Speaker-attributed passages carrying party, office, and
//!   topic context from the sitting they were spoken in
//! - **Hybrid retrieval**: A lexical and a vector branch over the same
//!   corpus, fused by reciprocal rank
//! - **Entity resolution**: Free-text mentions map to canonical people, and
//!   ambiguity is surfaced rather than guessed away
//! - **Agent loop**: Plan, call research tools within a per-turn budget,
//!   then synthesize a streamed, cited answer
//! - **Checkpointing**: Each debate commits atomically, so ingestion reruns
//!   pick up exactly what is missing
//!
//! ## Quick Start
//!
//! ### Working with Messages
//!
//! Conversation turns are plain role-plus-content messages:
//!
//! ```
//! use debatesmith::message::Message;
//!
//! let question = Message::user("How did the member for Brighton vote on fracking?");
//! let answer = Message::assistant("She voted against every fracking motion on record.");
//!
//! assert!(question.has_role(Message::USER));
//! assert_eq!(answer.role, Message::ASSISTANT);
//! ```
//!
//! ### Answering a question end to end
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use debatesmith::agent::{Orchestrator, ToolContext};
//! use debatesmith::ingest::{DebatePipeline, load_metadata};
//! use debatesmith::providers::OpenAiClient;
//! use debatesmith::resolve::EntityResolver;
//! use debatesmith::retrieval::HybridSearcher;
//! use debatesmith::service::ChatService;
//! use debatesmith::settings::Settings;
//! use debatesmith::store::Database;
//!
//! # async fn demo() -> miette::Result<()> {
//! let settings = Settings::from_env();
//! let db = Database::open(
//!     &settings.database_path,
//!     &settings.embedding_model,
//!     settings.embedding_dim,
//! )
//! .await?;
//! let client = Arc::new(OpenAiClient::new(
//!     &settings.api_base_url,
//!     &settings.api_key,
//!     &settings.chat_model,
//!     &settings.embedding_model,
//!     settings.embedding_dim,
//! )?);
//!
//! // Ingest whatever is new, metadata first so party lookups resolve.
//! let pipeline = DebatePipeline::new(&db, client.clone(), client.clone(), &settings).await?;
//! pipeline
//!     .apply_metadata(load_metadata(&settings.metadata_dir).await?)
//!     .await?;
//! pipeline.run(&settings.transcripts_dir).await?;
//!
//! // Wire the research tools and run one conversation turn.
//! let tools = ToolContext::new(
//!     HybridSearcher::new(db.corpus(), client.clone(), settings.branch_top_n),
//!     EntityResolver::new(db.people()),
//!     db.people(),
//!     db.votes(),
//!     settings.search_top_k,
//! );
//! let service = ChatService::new(
//!     db.conversations(),
//!     Orchestrator::new(client, tools, settings.tool_call_budget),
//! );
//!
//! let (events, receiver) = flume::unbounded();
//! let turn = service
//!     .respond(
//!         "thread-1",
//!         "What has been said about onshore wind since 2023?",
//!         &events,
//!     )
//!     .await?;
//! drop(receiver);
//! println!("{}", turn.answer);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`transcript`] - Source discovery and debate markup parsing
//! - [`chunking`] - Token-budgeted chunk assembly and speech condensation
//! - [`ingest`] - The transcript-to-index pipeline and metadata loaders
//! - [`store`] - SQLite persistence: corpus, people, votes, conversations
//! - [`retrieval`] - Hybrid lexical and vector search with rank fusion
//! - [`resolve`] - Mention-to-person resolution
//! - [`agent`] - The evidence-gathering loop and its research tools
//! - [`service`] - Conversation persistence around the agent
//! - [`providers`] - Chat and embedding capabilities over HTTP
//! - [`settings`] - Environment-driven configuration
//! - [`message`] - The conversation message primitive

pub mod agent;
pub mod chunking;
pub mod ingest;
pub mod message;
pub mod providers;
pub mod resolve;
pub mod retrieval;
pub mod service;
pub mod settings;
pub mod store;
pub mod transcript;
