//! Debate ingestion pipeline.
//!
//! One sequential pass over the transcripts directory: parse each source
//! into utterances, condense oversized speeches, assemble chunks, stamp the
//! speaker's party as of the sitting date, embed, and commit. A source
//! either commits atomically or leaves no trace, so the next run retries
//! exactly the files that have not landed yet.

pub mod metadata;

pub use metadata::{MetadataSet, load_metadata};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::chunking::{
    ChunkerConfig, ContextualChunker, Summarizer, SummaryError, TokenCounter, TokenizerError,
};
use crate::providers::{ChatModel, Embedder};
use crate::settings::Settings;
use crate::store::{CorpusStore, Database, PeopleStore, StoreError, VoteStore};
use crate::transcript::{DebateParser, SourceFile, TranscriptError, discover_sources};

/// Chunks embedded per capability request.
const EMBED_BATCH: usize = 64;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("metadata file {path}: {message}")]
    #[diagnostic(
        code(debatesmith::ingest::metadata),
        help("check the metadata directory and file permissions")
    )]
    Metadata { path: PathBuf, message: String },

    #[error(transparent)]
    #[diagnostic(code(debatesmith::ingest::store))]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(debatesmith::ingest::transcripts))]
    Transcripts(#[from] TranscriptError),

    #[error(transparent)]
    #[diagnostic(code(debatesmith::ingest::tokenizer))]
    Tokenizer(#[from] TokenizerError),

    #[error(transparent)]
    #[diagnostic(code(debatesmith::ingest::summary))]
    Summary(#[from] SummaryError),
}

/// Counters for one ingestion run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub discovered: usize,
    pub skipped: usize,
    pub ingested: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

/// Why one source was dropped from the run. Skips are retried on the next
/// run because the checkpoint never advances; fatal errors end the run.
enum SourceFailure {
    Skip { stage: &'static str, message: String },
    Fatal(IngestError),
}

/// Transcript-to-index pipeline over one database.
pub struct DebatePipeline {
    parser: DebateParser,
    chunker: ContextualChunker,
    summarizer: Summarizer,
    embedder: Arc<dyn Embedder>,
    corpus: CorpusStore,
    people: PeopleStore,
    votes: VoteStore,
}

impl DebatePipeline {
    pub async fn new(
        db: &Database,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        settings: &Settings,
    ) -> Result<Self, IngestError> {
        let counter = Arc::new(TokenCounter::new()?);
        let parser = DebateParser::new()?;
        let chunker = ContextualChunker::new(
            Arc::clone(&counter),
            ChunkerConfig {
                token_budget: settings.chunk_token_budget,
                overlap_tokens: settings.chunk_overlap_tokens,
            },
        );
        let summarizer = Summarizer::new(
            chat,
            counter,
            settings.summary_cache_path.clone(),
            settings.summary_threshold_tokens,
        )
        .await?;
        Ok(Self {
            parser,
            chunker,
            summarizer,
            embedder,
            corpus: db.corpus(),
            people: db.people(),
            votes: db.votes(),
        })
    }

    /// Upserts member and division metadata. People land before memberships
    /// so party-at-date lookups during transcript ingestion see them, and
    /// divisions land before the votes that reference them.
    #[instrument(skip(self, set), err)]
    pub async fn apply_metadata(&self, set: MetadataSet) -> Result<(), IngestError> {
        if set.is_empty() {
            debug!("no metadata to apply");
            return Ok(());
        }
        self.people.upsert_people(set.people).await?;
        self.people.upsert_aliases(set.aliases).await?;
        self.people.replace_memberships(set.memberships).await?;
        self.votes.upsert_divisions(set.divisions).await?;
        self.votes
            .upsert_policies(set.policies, set.policy_links)
            .await?;
        self.votes.upsert_votes(set.votes).await?;
        info!("metadata applied");
        Ok(())
    }

    /// Ingests every transcript under `transcripts_dir` that has not been
    /// committed yet. Per-source failures are logged and skipped; the run
    /// only stops early when the store itself fails.
    #[instrument(skip(self), err)]
    pub async fn run(&self, transcripts_dir: &Path) -> Result<IngestReport, IngestError> {
        let sources = discover_sources(transcripts_dir)?;
        let mut report = IngestReport {
            discovered: sources.len(),
            ..IngestReport::default()
        };

        for source in &sources {
            if self.corpus.is_ingested(&source.debate_id).await? {
                debug!(debate_id = %source.debate_id, "already committed, skipping");
                report.skipped += 1;
                continue;
            }
            match self.ingest_source(source).await {
                Ok(written) => {
                    report.ingested += 1;
                    report.chunks_written += written;
                }
                Err(SourceFailure::Skip { stage, message }) => {
                    warn!(
                        debate_id = %source.debate_id,
                        stage,
                        error = %message,
                        "source failed, leaving it for the next run"
                    );
                    report.failed += 1;
                }
                Err(SourceFailure::Fatal(err)) => return Err(err),
            }
        }

        info!(
            discovered = report.discovered,
            skipped = report.skipped,
            ingested = report.ingested,
            failed = report.failed,
            chunks = report.chunks_written,
            "ingestion run complete"
        );
        Ok(report)
    }

    async fn ingest_source(&self, source: &SourceFile) -> Result<usize, SourceFailure> {
        let utterances = self.parser.parse_file(source).map_err(|err| {
            SourceFailure::Skip {
                stage: "parse",
                message: err.to_string(),
            }
        })?;
        let summaries =
            self.summarizer
                .condense(&utterances)
                .await
                .map_err(|err| SourceFailure::Skip {
                    stage: "summarize",
                    message: err.to_string(),
                })?;
        let mut chunks = self.chunker.chunk_debate(&utterances, &summaries);

        // Party is whatever membership covered the sitting date; speakers
        // without a matching interval stay unattributed rather than failing.
        let mut party_cache: FxHashMap<i64, Option<String>> = FxHashMap::default();
        for chunk in &mut chunks {
            let Some(person_id) = chunk.person_id else {
                continue;
            };
            if let Some(cached) = party_cache.get(&person_id) {
                chunk.party = cached.clone();
                continue;
            }
            let party = self
                .people
                .party_on(person_id, chunk.date)
                .await
                .map_err(|err| SourceFailure::Fatal(err.into()))?;
            party_cache.insert(person_id, party.clone());
            chunk.party = party;
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.embedding_text.clone()).collect();
            let vectors =
                self.embedder
                    .embed(&texts)
                    .await
                    .map_err(|err| SourceFailure::Skip {
                        stage: "embed",
                        message: err.to_string(),
                    })?;
            embeddings.extend(vectors);
        }

        // Empty debates commit too, so reruns do not re-parse them.
        let written = chunks.len();
        self.corpus
            .commit_debate(
                source.debate_id.clone(),
                source.date,
                source.path.display().to_string(),
                chunks,
                embeddings,
            )
            .await
            .map_err(|err| SourceFailure::Fatal(err.into()))?;
        info!(
            debate_id = %source.debate_id,
            utterances = utterances.len(),
            chunks = written,
            "ingested debate"
        );
        Ok(written)
    }
}
