//! Front door for search: embed the query, run both branches under one
//! filter, fuse by rank, hydrate the winners.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::providers::{Embedder, ProviderError};
use crate::store::{CorpusStore, StoreError, StoredChunk};

use super::filter::SearchFilter;
use super::fusion::fuse;

#[derive(Debug, Error, Diagnostic)]
pub enum SearchError {
    #[error(transparent)]
    #[diagnostic(code(debatesmith::retrieval::embedding))]
    Embedding(#[from] ProviderError),

    #[error(transparent)]
    #[diagnostic(code(debatesmith::retrieval::store))]
    Store(#[from] StoreError),
}

/// A fused search result ready for citation.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub chunk: StoredChunk,
    pub score: f64,
}

pub struct HybridSearcher {
    corpus: CorpusStore,
    embedder: Arc<dyn Embedder>,
    /// How deep each branch list goes before fusion.
    branch_top_n: usize,
}

impl HybridSearcher {
    pub fn new(corpus: CorpusStore, embedder: Arc<dyn Embedder>, branch_top_n: usize) -> Self {
        Self {
            corpus,
            embedder,
            branch_top_n,
        }
    }

    /// Runs both branches with the same filter and returns the fused top
    /// `top_k`. Either branch coming back empty is fine; the other still
    /// carries the result.
    pub async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let vector_hits = self
            .corpus
            .vector_search(&query_vector, filter, self.branch_top_n)
            .await?;
        let lexical_hits = self
            .corpus
            .lexical_search(query, filter, self.branch_top_n)
            .await?;
        debug!(
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            "branch results before fusion"
        );

        let branches = [
            vector_hits.into_iter().map(|hit| hit.chunk_id).collect(),
            lexical_hits.into_iter().map(|hit| hit.chunk_id).collect(),
        ];
        let fused = fuse(&branches);

        let ids: Vec<String> = fused
            .iter()
            .take(top_k)
            .map(|hit| hit.chunk_id.clone())
            .collect();
        let scores: FxHashMap<String, f64> = fused
            .iter()
            .take(top_k)
            .map(|hit| (hit.chunk_id.clone(), hit.score))
            .collect();
        let chunks = self.corpus.fetch_chunks(&ids).await?;

        // fetch_chunks preserves the fused order and drops ids it cannot
        // hydrate, so scores are looked up rather than zipped.
        Ok(chunks
            .into_iter()
            .filter_map(|chunk| {
                let score = scores.get(&chunk.id).copied()?;
                Some(SearchHit { chunk, score })
            })
            .collect())
    }
}
