//! Chunk corpus: ingestion commits plus the vector and lexical branches.

use chrono::{NaiveDate, Utc};
use rustc_hash::FxHashMap;
use tokio_rusqlite::types::Value;
use tokio_rusqlite::{Connection, params, params_from_iter};
use tracing::{debug, instrument};

use crate::chunking::DebateChunk;
use crate::retrieval::filter::{SearchFilter, sanitize_match_query};

use super::{StoreError, parse_stored_date, placeholders};

/// A chunk as persisted, minus its embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub debate_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub date: NaiveDate,
    pub speaker_name: Option<String>,
    pub person_id: Option<i64>,
    pub office: Option<String>,
    pub party: Option<String>,
    pub topic_path: Vec<String>,
    pub first_seq: u32,
    pub last_seq: u32,
    pub question_seq: Option<u32>,
    pub summarized: bool,
}

impl StoredChunk {
    pub fn topic_line(&self) -> String {
        self.topic_path.join(" > ")
    }
}

/// One branch result. `score` is branch-native with higher meaning better;
/// it is carried for logging only, ranks drive fusion.
#[derive(Clone, Debug, PartialEq)]
pub struct RankedHit {
    pub chunk_id: String,
    pub score: f32,
}

#[derive(Clone)]
pub struct CorpusStore {
    conn: Connection,
}

impl CorpusStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn is_ingested(&self, debate_id: &str) -> Result<bool, StoreError> {
        let debate_id = debate_id.to_string();
        let count: i64 = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM ingested_sources WHERE debate_id = ?",
                    params![debate_id],
                    |row| row.get(0),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(count > 0)
    }

    /// Commits one debate in a single transaction: chunk rows, their FTS and
    /// embedding entries, and the source checkpoint. Any revision already
    /// checkpointed for the same sitting date is removed first, so a
    /// republished sitting replaces its predecessor instead of piling on.
    #[instrument(skip(self, source_path, chunks, embeddings), err)]
    pub async fn commit_debate(
        &self,
        debate_id: String,
        sitting_date: NaiveDate,
        source_path: String,
        chunks: Vec<DebateChunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::Query {
                message: format!(
                    "commit for {debate_id} got {} chunks but {} embeddings",
                    chunks.len(),
                    embeddings.len()
                ),
            });
        }
        let sitting = sitting_date.to_string();
        let ingested_at = Utc::now().to_rfc3339();
        let chunk_count = chunks.len();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut stale: Vec<String> = {
                    let mut stmt = tx
                        .prepare(
                            "SELECT debate_id FROM ingested_sources WHERE sitting_date = ?",
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let rows = stmt
                        .query_map(params![sitting], |row| row.get(0))
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let mut ids = Vec::new();
                    for row in rows {
                        ids.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                    }
                    ids
                };
                if !stale.iter().any(|id| id == &debate_id) {
                    stale.push(debate_id.clone());
                }
                for id in &stale {
                    tx.execute(
                        "DELETE FROM chunk_fts WHERE rowid IN
                         (SELECT rowid FROM chunks WHERE debate_id = ?)",
                        params![id],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.execute(
                        "DELETE FROM chunk_embeddings WHERE chunk_id IN
                         (SELECT id FROM chunks WHERE debate_id = ?)",
                        params![id],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.execute("DELETE FROM chunks WHERE debate_id = ?", params![id])
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.execute(
                    "DELETE FROM ingested_sources WHERE sitting_date = ?",
                    params![sitting],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                for (chunk, embedding) in chunks.iter().zip(&embeddings) {
                    let topic_path = serde_json::to_string(&chunk.topic_path)
                        .map_err(|err| tokio_rusqlite::Error::Other(err.into()))?;
                    let source_seqs = serde_json::to_string(&chunk.source_seqs)
                        .map_err(|err| tokio_rusqlite::Error::Other(err.into()))?;
                    tx.execute(
                        "INSERT INTO chunks (id, debate_id, chunk_index, text, date,
                             speaker_name, person_id, office, party, topic_path,
                             first_seq, last_seq, source_seqs, question_seq, summarized)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        params![
                            chunk.id,
                            chunk.debate_id,
                            chunk.chunk_index as i64,
                            chunk.text,
                            chunk.date.to_string(),
                            chunk.speaker_name,
                            chunk.person_id,
                            chunk.office,
                            chunk.party,
                            topic_path,
                            i64::from(chunk.first_seq),
                            i64::from(chunk.last_seq),
                            source_seqs,
                            chunk.question_seq.map(i64::from),
                            i64::from(chunk.summarized),
                        ],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let rowid = tx.last_insert_rowid();
                    tx.execute(
                        "INSERT INTO chunk_fts (rowid, text) VALUES (?, ?)",
                        params![rowid, chunk.text],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let vector_json = serde_json::to_string(embedding)
                        .map_err(|err| tokio_rusqlite::Error::Other(err.into()))?;
                    tx.execute(
                        "INSERT INTO chunk_embeddings (chunk_id, embedding)
                         VALUES (?, vec_f32(?))",
                        params![chunk.id, vector_json],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }

                tx.execute(
                    "INSERT OR REPLACE INTO ingested_sources
                         (debate_id, sitting_date, source_path, chunk_count, ingested_at)
                     VALUES (?, ?, ?, ?, ?)",
                    params![debate_id, sitting, source_path, chunk_count as i64, ingested_at],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        debug!(chunk_count, "debate committed");
        Ok(())
    }

    /// Cosine-distance scan over the embedding table, filtered in SQL.
    /// Ordered best-first with chunk id as the deterministic tie-break.
    pub async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<RankedHit>, StoreError> {
        let vector_json = serde_json::to_string(embedding).map_err(|err| StoreError::Query {
            message: err.to_string(),
        })?;
        let (mut conditions, mut values) = filter_conditions(filter);
        conditions.insert(0, "1 = 1".to_string());
        values.insert(0, Value::Text(vector_json));
        let sql = format!(
            "SELECT c.id, vec_distance_cosine(e.embedding, vec_f32(?)) AS distance
             FROM chunks c
             JOIN chunk_embeddings e ON e.chunk_id = c.id
             WHERE {}
             ORDER BY distance ASC, c.id ASC
             LIMIT {limit}",
            conditions.join(" AND "),
        );
        // Placeholders bind in SQL text order, so the SELECT's vector comes
        // ahead of the filter values. The no-op condition keeps the WHERE
        // clause well formed when no filter is set.
        self.ranked_query(sql, values, |distance| 1.0 - distance).await
    }

    /// BM25 query over the FTS index with the same filter semantics as the
    /// vector branch. An empty sanitized query short-circuits to no hits.
    pub async fn lexical_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<RankedHit>, StoreError> {
        let Some(match_expr) = sanitize_match_query(query) else {
            return Ok(Vec::new());
        };
        let (mut conditions, mut values) = filter_conditions(filter);
        conditions.insert(0, "chunk_fts MATCH ?".to_string());
        values.insert(0, Value::Text(match_expr));
        let sql = format!(
            "SELECT c.id, bm25(chunk_fts) AS rank
             FROM chunk_fts
             JOIN chunks c ON c.rowid = chunk_fts.rowid
             WHERE {}
             ORDER BY rank ASC, c.id ASC
             LIMIT {limit}",
            conditions.join(" AND "),
        );
        // bm25() is smaller-is-better, negate so callers see higher-is-better.
        self.ranked_query(sql, values, |rank| -rank).await
    }

    async fn ranked_query(
        &self,
        sql: String,
        values: Vec<Value>,
        score: impl Fn(f32) -> f32 + Send + 'static,
    ) -> Result<Vec<RankedHit>, StoreError> {
        let hits = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map(params_from_iter(values), |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, f32>(1)?))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut hits = Vec::new();
                for row in rows {
                    let (chunk_id, raw) = row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    hits.push(RankedHit {
                        chunk_id,
                        score: score(raw),
                    });
                }
                Ok(hits)
            })
            .await?;
        Ok(hits)
    }

    /// Hydrates chunks by id, preserving the order of `ids`. Unknown ids are
    /// silently dropped.
    pub async fn fetch_chunks(&self, ids: &[String]) -> Result<Vec<StoredChunk>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, debate_id, chunk_index, text, date, speaker_name, person_id,
                    office, party, topic_path, first_seq, last_seq, question_seq, summarized
             FROM chunks WHERE id IN ({})",
            placeholders(ids.len()),
        );
        let ids = ids.to_vec();
        let chunks = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map(params_from_iter(ids.iter()), |row| {
                        Ok(RawChunk {
                            id: row.get(0)?,
                            debate_id: row.get(1)?,
                            chunk_index: row.get(2)?,
                            text: row.get(3)?,
                            date: row.get(4)?,
                            speaker_name: row.get(5)?,
                            person_id: row.get(6)?,
                            office: row.get(7)?,
                            party: row.get(8)?,
                            topic_path: row.get(9)?,
                            first_seq: row.get(10)?,
                            last_seq: row.get(11)?,
                            question_seq: row.get(12)?,
                            summarized: row.get(13)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut by_id = FxHashMap::default();
                for row in rows {
                    let raw = row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let chunk = StoredChunk::try_from(raw)?;
                    by_id.insert(chunk.id.clone(), chunk);
                }
                Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
            })
            .await?;
        Ok(chunks)
    }

    pub async fn chunk_count(&self, debate_id: &str) -> Result<usize, StoreError> {
        let debate_id = debate_id.to_string();
        let count: i64 = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE debate_id = ?",
                    params![debate_id],
                    |row| row.get(0),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub async fn total_chunks(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

struct RawChunk {
    id: String,
    debate_id: String,
    chunk_index: i64,
    text: String,
    date: String,
    speaker_name: Option<String>,
    person_id: Option<i64>,
    office: Option<String>,
    party: Option<String>,
    topic_path: String,
    first_seq: i64,
    last_seq: i64,
    question_seq: Option<i64>,
    summarized: i64,
}

impl TryFrom<RawChunk> for StoredChunk {
    type Error = tokio_rusqlite::Error;

    fn try_from(raw: RawChunk) -> Result<Self, Self::Error> {
        let date = parse_stored_date(&raw.date)?;
        let topic_path: Vec<String> = serde_json::from_str(&raw.topic_path)
            .map_err(|err| tokio_rusqlite::Error::Other(err.into()))?;
        Ok(Self {
            id: raw.id,
            debate_id: raw.debate_id,
            chunk_index: usize::try_from(raw.chunk_index)
                .map_err(|err| tokio_rusqlite::Error::Other(err.into()))?,
            text: raw.text,
            date,
            speaker_name: raw.speaker_name,
            person_id: raw.person_id,
            office: raw.office,
            party: raw.party,
            topic_path,
            first_seq: u32::try_from(raw.first_seq)
                .map_err(|err| tokio_rusqlite::Error::Other(err.into()))?,
            last_seq: u32::try_from(raw.last_seq)
                .map_err(|err| tokio_rusqlite::Error::Other(err.into()))?,
            question_seq: match raw.question_seq {
                Some(seq) => Some(
                    u32::try_from(seq)
                        .map_err(|err| tokio_rusqlite::Error::Other(err.into()))?,
                ),
                None => None,
            },
            summarized: raw.summarized != 0,
        })
    }
}

fn filter_conditions(filter: &SearchFilter) -> (Vec<String>, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    if let Some(party) = &filter.party {
        conditions.push("c.party = ?".to_string());
        values.push(Value::Text(party.clone()));
    }
    if let Some(person_id) = filter.person_id {
        conditions.push("c.person_id = ?".to_string());
        values.push(Value::Integer(person_id));
    }
    if let Some(from) = filter.date_from {
        conditions.push("c.date >= ?".to_string());
        values.push(Value::Text(from.to_string()));
    }
    if let Some(to) = filter.date_to {
        conditions.push("c.date <= ?".to_string());
        values.push(Value::Text(to.to_string()));
    }
    (conditions, values)
}
