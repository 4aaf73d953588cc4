//! Environment-driven configuration.
//!
//! All knobs resolve from environment variables (a `.env` file is honored
//! when the binaries call [`dotenvy::dotenv`]) with sensible defaults, so
//! a bare `ingest`/`chat` invocation works against a local database.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Resolved runtime settings shared by the ingestion pipeline and the
/// query-time service.
///
/// Build one with [`Settings::from_env`] in binaries, or construct it
/// directly in tests.
#[derive(Clone, Debug)]
pub struct Settings {
    /// SQLite database file holding the corpus, indexes, metadata and
    /// conversation threads.
    pub database_path: PathBuf,
    /// Directory of raw debate transcript files.
    pub transcripts_dir: PathBuf,
    /// Directory of metadata files (people, divisions, votes, policies).
    pub metadata_dir: PathBuf,
    /// JSON file caching utterance summaries between ingestion runs.
    pub summary_cache_path: PathBuf,
    /// Base URL of the OpenAI-compatible API.
    pub api_base_url: String,
    /// Bearer token for the API. Empty means unauthenticated (local server).
    pub api_key: String,
    /// Chat model used for planning, synthesis and summarization.
    pub chat_model: String,
    /// Embedding model identifier. Pinned into the index on first write.
    pub embedding_model: String,
    /// Expected embedding dimensionality.
    pub embedding_dim: usize,
    /// Token budget per chunk.
    pub chunk_token_budget: usize,
    /// Trailing overlap carried into the next chunk, in tokens.
    pub chunk_overlap_tokens: usize,
    /// Utterances longer than this many tokens are summarized before
    /// chunk assembly.
    pub summary_threshold_tokens: usize,
    /// Maximum tool calls per conversation turn.
    pub tool_call_budget: usize,
    /// Results returned from a fused search.
    pub search_top_k: usize,
    /// Depth of each retrieval branch before fusion.
    pub branch_top_n: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("debatesmith.db"),
            transcripts_dir: PathBuf::from("data/debates"),
            metadata_dir: PathBuf::from("data/metadata"),
            summary_cache_path: PathBuf::from("data/summary_cache.json"),
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dim: 384,
            chunk_token_budget: 400,
            chunk_overlap_tokens: 100,
            summary_threshold_tokens: 100,
            tool_call_budget: 6,
            search_top_k: 10,
            branch_top_n: 50,
        }
    }
}

impl Settings {
    /// Resolves settings from the environment, falling back to defaults.
    ///
    /// Unparseable numeric values log a warning and keep the default
    /// rather than aborting startup.
    #[must_use]
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            database_path: env_path("DEBATESMITH_DB", base.database_path),
            transcripts_dir: env_path("DEBATESMITH_TRANSCRIPTS", base.transcripts_dir),
            metadata_dir: env_path("DEBATESMITH_METADATA", base.metadata_dir),
            summary_cache_path: env_path("DEBATESMITH_SUMMARY_CACHE", base.summary_cache_path),
            api_base_url: env_string("OPENAI_BASE_URL", base.api_base_url),
            api_key: env_string("OPENAI_API_KEY", base.api_key),
            chat_model: env_string("DEBATESMITH_CHAT_MODEL", base.chat_model),
            embedding_model: env_string("DEBATESMITH_EMBEDDING_MODEL", base.embedding_model),
            embedding_dim: env_parse("DEBATESMITH_EMBEDDING_DIM", base.embedding_dim),
            chunk_token_budget: env_parse("DEBATESMITH_CHUNK_BUDGET", base.chunk_token_budget),
            chunk_overlap_tokens: env_parse("DEBATESMITH_CHUNK_OVERLAP", base.chunk_overlap_tokens),
            summary_threshold_tokens: env_parse(
                "DEBATESMITH_SUMMARY_THRESHOLD",
                base.summary_threshold_tokens,
            ),
            tool_call_budget: env_parse("DEBATESMITH_TOOL_BUDGET", base.tool_call_budget),
            search_top_k: env_parse("DEBATESMITH_TOP_K", base.search_top_k),
            branch_top_n: env_parse("DEBATESMITH_BRANCH_N", base.branch_top_n),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, raw, %default, "unparseable setting, keeping default");
                default
            }
        },
        Err(_) => default,
    }
}
