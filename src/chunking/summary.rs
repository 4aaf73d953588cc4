//! Condenses oversized utterances before chunk assembly.
//!
//! Long speeches blow past the chunk token budget and drown the retrieval
//! signal, so anything above the configured threshold is replaced by a short
//! model-written summary. Summaries are cached on disk keyed by a content
//! hash, which keeps re-ingestion runs from paying for the same speech twice.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::providers::{ChatModel, PromptMessage, ProviderError};
use crate::transcript::{SpeechKind, Utterance};

use super::tokens::TokenCounter;

#[derive(Debug, Error, Diagnostic)]
pub enum SummaryError {
    #[error("summary cache at {path}: {message}")]
    #[diagnostic(
        code(debatesmith::chunking::summary_cache),
        help("check that the cache path is writable and holds valid JSON")
    )]
    Cache { path: PathBuf, message: String },

    #[error(transparent)]
    #[diagnostic(code(debatesmith::chunking::summary_capability))]
    Capability(#[from] ProviderError),
}

/// Disk-backed map from content hash to summary text.
#[derive(Clone, Debug)]
pub struct SummaryCache {
    path: PathBuf,
    state: Arc<Mutex<FxHashMap<String, String>>>,
}

impl SummaryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads previously persisted summaries, if any.
    pub async fn load(&self) -> Result<(), SummaryError> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&self.path)
            .await
            .map_err(|err| self.cache_error(err.to_string()))?;
        let entries: FxHashMap<String, String> =
            serde_json::from_str(&data).map_err(|err| self.cache_error(err.to_string()))?;
        let mut guard = self.state.lock().await;
        *guard = entries;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let guard = self.state.lock().await;
        guard.get(key).cloned()
    }

    /// Stores a summary and persists the updated state.
    pub async fn put(&self, key: &str, summary: &str) -> Result<(), SummaryError> {
        let mut guard = self.state.lock().await;
        guard.insert(key.to_string(), summary.to_string());
        let serialized = serde_json::to_string(&*guard)
            .map_err(|err| self.cache_error(err.to_string()))?;
        drop(guard);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|err| self.cache_error(err.to_string()))?;
            }
        }
        fs::write(&self.path, serialized)
            .await
            .map_err(|err| self.cache_error(err.to_string()))?;
        Ok(())
    }

    fn cache_error(&self, message: String) -> SummaryError {
        SummaryError::Cache {
            path: self.path.clone(),
            message,
        }
    }
}

/// Rewrites over-threshold utterances into 1-2 sentence summaries.
pub struct Summarizer {
    chat: Arc<dyn ChatModel>,
    counter: Arc<TokenCounter>,
    cache: SummaryCache,
    threshold_tokens: usize,
}

impl Summarizer {
    pub async fn new(
        chat: Arc<dyn ChatModel>,
        counter: Arc<TokenCounter>,
        cache_path: impl Into<PathBuf>,
        threshold_tokens: usize,
    ) -> Result<Self, SummaryError> {
        let cache = SummaryCache::new(cache_path);
        cache.load().await?;
        Ok(Self {
            chat,
            counter,
            cache,
            threshold_tokens,
        })
    }

    /// Returns `seq -> summary` for every attributed utterance over the
    /// threshold. Utterances at or under it are left for verbatim chunking.
    pub async fn condense(
        &self,
        utterances: &[Utterance],
    ) -> Result<FxHashMap<u32, String>, SummaryError> {
        let mut summaries = FxHashMap::default();
        for utterance in utterances {
            if utterance.speaker.is_none() || utterance.is_empty() {
                continue;
            }
            if self.counter.count(&utterance.text) <= self.threshold_tokens {
                continue;
            }
            let summary = self.summarize(utterance).await?;
            summaries.insert(utterance.seq, summary);
        }
        Ok(summaries)
    }

    async fn summarize(&self, utterance: &Utterance) -> Result<String, SummaryError> {
        let key = content_key(&utterance.text);
        if let Some(cached) = self.cache.get(&key).await {
            debug!(debate_id = %utterance.debate_id, seq = utterance.seq, "summary cache hit");
            return Ok(cached);
        }
        let label = speech_label(utterance.kind);
        let prompt = format!(
            "Summarize this parliamentary {label} in 1-2 sentences, preserving key facts and positions.\n\n{}",
            utterance.text
        );
        let history = [
            PromptMessage::system("You condense UK parliamentary speech for a search index."),
            PromptMessage::user(&prompt),
        ];
        let summary = self.chat.complete(&history).await?;
        let summary = summary.trim().to_string();
        self.cache.put(&key, &summary).await?;
        Ok(summary)
    }
}

fn content_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn speech_label(kind: SpeechKind) -> &'static str {
    match kind {
        SpeechKind::Statement => "statement",
        SpeechKind::Question | SpeechKind::SupplementaryQuestion => "question",
        SpeechKind::Answer => "answer",
        SpeechKind::Intervention => "intervention",
    }
}
