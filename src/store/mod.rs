//! SQLite persistence for chunks, people, votes, and conversations.
//!
//! One database file holds everything. The [`Database`] handle owns the
//! connection, runs migrations, and hands out per-concern store views that
//! share it. Vector search relies on the sqlite-vec extension, lexical search
//! on FTS5; both are verified or created at open time.
//!
//! Failures here are fatal to the operation that hit them. Callers surface
//! [`StoreError`] rather than degrading to partial answers.

pub mod conversation;
pub mod corpus;
pub mod people;
pub mod votes;

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::Once;

use chrono::NaiveDate;
use miette::Diagnostic;
use thiserror::Error;
use tokio_rusqlite::{Connection, OptionalExtension, ffi, params};
use tracing::info;

pub use conversation::ConversationStore;
pub use corpus::{CorpusStore, RankedHit, StoredChunk};
pub use people::{MembershipRecord, PeopleStore, PersonProfile, PersonRecord};
pub use votes::{
    DivisionRecord, PolicyAlignment, PolicyDirection, PolicyLink, PolicyRecord, VoteChoice,
    VoteEvent, VoteRecord, VoteStore, VotingRecord,
};

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("open database at {path}: {message}")]
    #[diagnostic(
        code(debatesmith::store::open),
        help("check that the path is writable and that sqlite-vec registered")
    )]
    Open { path: PathBuf, message: String },

    #[error("sqlite-vec registration failed: {message}")]
    #[diagnostic(code(debatesmith::store::extension))]
    Extension { message: String },

    #[error("database query failed: {message}")]
    #[diagnostic(code(debatesmith::store::query))]
    Query { message: String },

    #[error("index was built with embedding model '{indexed}' but '{configured}' is configured")]
    #[diagnostic(
        code(debatesmith::store::model_pin),
        help("re-ingest into a fresh database or switch back to the indexed model")
    )]
    ModelMismatch { indexed: String, configured: String },

    #[error("index stores {indexed}-dimension embeddings but {configured} is configured")]
    #[diagnostic(
        code(debatesmith::store::dimension_pin),
        help("re-ingest into a fresh database or restore the indexed dimension")
    )]
    DimensionMismatch { indexed: usize, configured: usize },
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::Query {
            message: err.to_string(),
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ingested_sources (
    debate_id    TEXT PRIMARY KEY,
    sitting_date TEXT NOT NULL,
    source_path  TEXT NOT NULL,
    chunk_count  INTEGER NOT NULL,
    ingested_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id           TEXT PRIMARY KEY,
    debate_id    TEXT NOT NULL,
    chunk_index  INTEGER NOT NULL,
    text         TEXT NOT NULL,
    date         TEXT NOT NULL,
    speaker_name TEXT,
    person_id    INTEGER,
    office       TEXT,
    party        TEXT,
    topic_path   TEXT NOT NULL,
    first_seq    INTEGER NOT NULL,
    last_seq     INTEGER NOT NULL,
    source_seqs  TEXT NOT NULL,
    question_seq INTEGER,
    summarized   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_chunks_debate ON chunks(debate_id);
CREATE INDEX IF NOT EXISTS idx_chunks_person ON chunks(person_id);
CREATE INDEX IF NOT EXISTS idx_chunks_party_date ON chunks(party, date);

CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(text);

CREATE TABLE IF NOT EXISTS chunk_embeddings (
    chunk_id  TEXT PRIMARY KEY,
    embedding BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS people (
    id             INTEGER PRIMARY KEY,
    canonical_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS person_aliases (
    person_id INTEGER NOT NULL,
    alias     TEXT NOT NULL,
    PRIMARY KEY (person_id, alias)
);
CREATE INDEX IF NOT EXISTS idx_aliases_alias ON person_aliases(alias);

CREATE TABLE IF NOT EXISTS memberships (
    id           TEXT PRIMARY KEY,
    person_id    INTEGER NOT NULL,
    party        TEXT,
    constituency TEXT,
    start_date   TEXT NOT NULL,
    end_date     TEXT
);
CREATE INDEX IF NOT EXISTS idx_memberships_person ON memberships(person_id, start_date);

CREATE TABLE IF NOT EXISTS divisions (
    id    TEXT PRIMARY KEY,
    date  TEXT NOT NULL,
    title TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS policies (
    id    TEXT PRIMARY KEY,
    title TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS division_policies (
    division_id TEXT NOT NULL,
    policy_id   TEXT NOT NULL,
    direction   TEXT NOT NULL,
    PRIMARY KEY (division_id, policy_id)
);

CREATE TABLE IF NOT EXISTS votes (
    division_id TEXT NOT NULL,
    person_id   INTEGER NOT NULL,
    choice      TEXT NOT NULL,
    teller      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (division_id, person_id)
);
CREATE INDEX IF NOT EXISTS idx_votes_person ON votes(person_id);

CREATE TABLE IF NOT EXISTS messages (
    thread_id  TEXT NOT NULL,
    seq        INTEGER NOT NULL,
    role       TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (thread_id, seq)
);
";

/// Handle to the opened database. Cheap to clone; all store views share the
/// same background connection.
#[derive(Clone, Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database, verifies sqlite-vec, runs
    /// migrations, and pins the embedding model configuration.
    pub async fn open(
        path: impl AsRef<Path>,
        embedding_model: &str,
        embedding_dim: usize,
    ) -> Result<Self, StoreError> {
        register_sqlite_vec()?;
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path.clone())
            .await
            .map_err(|err| StoreError::Open {
                path: path.clone(),
                message: err.to_string(),
            })?;

        let vec_version = conn
            .call(|conn| {
                conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| StoreError::Open {
                path: path.clone(),
                message: format!("sqlite-vec unavailable: {err}"),
            })?;
        info!(path = %path.display(), %vec_version, "database opened");

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await?;

        let database = Self { conn };
        database.pin_embedding_config(embedding_model, embedding_dim).await?;
        Ok(database)
    }

    pub fn corpus(&self) -> CorpusStore {
        CorpusStore::new(self.conn.clone())
    }

    pub fn people(&self) -> PeopleStore {
        PeopleStore::new(self.conn.clone())
    }

    pub fn votes(&self) -> VoteStore {
        VoteStore::new(self.conn.clone())
    }

    pub fn conversations(&self) -> ConversationStore {
        ConversationStore::new(self.conn.clone())
    }

    /// Records the embedding model and dimension on first open, and refuses
    /// to serve an index built with a different configuration afterwards.
    async fn pin_embedding_config(&self, model: &str, dim: usize) -> Result<(), StoreError> {
        let model_owned = model.to_string();
        let pinned: Option<(String, String)> = self
            .conn
            .call(move |conn| {
                let existing = conn
                    .query_row(
                        "SELECT value FROM meta WHERE key = 'embedding_model'",
                        [],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                match existing {
                    Some(stored_model) => {
                        let stored_dim = conn
                            .query_row(
                                "SELECT value FROM meta WHERE key = 'embedding_dim'",
                                [],
                                |row| row.get::<_, String>(0),
                            )
                            .optional()
                            .map_err(tokio_rusqlite::Error::Rusqlite)?
                            .unwrap_or_default();
                        Ok(Some((stored_model, stored_dim)))
                    }
                    None => {
                        conn.execute(
                            "INSERT INTO meta (key, value) VALUES
                             ('embedding_model', ?1), ('embedding_dim', ?2)",
                            params![model_owned, dim.to_string()],
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        Ok(None)
                    }
                }
            })
            .await?;

        if let Some((stored_model, stored_dim)) = pinned {
            if stored_model != model {
                return Err(StoreError::ModelMismatch {
                    indexed: stored_model,
                    configured: model.to_string(),
                });
            }
            let stored_dim: usize = stored_dim.parse().map_err(|_| StoreError::Query {
                message: format!("meta embedding_dim holds non-numeric value '{stored_dim}'"),
            })?;
            if stored_dim != dim {
                return Err(StoreError::DimensionMismatch {
                    indexed: stored_dim,
                    configured: dim,
                });
            }
        }
        Ok(())
    }
}

fn register_sqlite_vec() -> Result<(), StoreError> {
    use std::sync::Mutex;

    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *const c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!(
                    "failed to register sqlite-vec extension (code {rc})"
                ))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(|message| StoreError::Extension { message })
}

/// Parses a stored ISO date column back into a [`NaiveDate`].
pub(crate) fn parse_stored_date(text: &str) -> Result<NaiveDate, tokio_rusqlite::Error> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|err| {
        tokio_rusqlite::Error::Other(
            format!("stored date '{text}' is not ISO formatted: {err}").into(),
        )
    })
}

/// Builds `?,?,...` for an `IN` clause with `count` slots.
pub(crate) fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count.saturating_mul(2));
    for index in 0..count {
        if index > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}
