//! The three tools the orchestrator can call, and their dispatch.
//!
//! Tool failures are evidence, not crashes: anything that stops a tool from
//! answering (bad arguments, capability failures, unknown names) comes back
//! as a payload describing the gap so the model can work around it or tell
//! the user. Only persistence failures escape as errors.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::providers::{ToolCallRequest, ToolSpec};
use crate::resolve::{EntityResolver, Resolution};
use crate::retrieval::{HybridSearcher, SearchError, SearchFilter, SearchHit};
use crate::store::{PeopleStore, PersonProfile, VoteStore};

use super::AgentError;

pub const TOOL_SEARCH_RECORDS: &str = "search_records";
pub const TOOL_LIST_PEOPLE: &str = "list_people";
pub const TOOL_GET_VOTING_RECORD: &str = "get_voting_record";

const SIMILAR_NAME_LIMIT: usize = 10;

/// Which tool a call dispatched to, tracked for the cross-referencing note.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolKind {
    SearchRecords,
    ListPeople,
    GetVotingRecord,
    Unknown,
}

/// Outcome of one tool call. `gap` marks evidence the model asked for but
/// did not get, which feeds the final answer's incompleteness note.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub kind: ToolKind,
    pub payload: Value,
    pub gap: bool,
}

/// Everything tool dispatch needs, shared across a session.
pub struct ToolContext {
    searcher: HybridSearcher,
    resolver: EntityResolver,
    people: PeopleStore,
    votes: VoteStore,
    search_top_k: usize,
}

impl ToolContext {
    pub fn new(
        searcher: HybridSearcher,
        resolver: EntityResolver,
        people: PeopleStore,
        votes: VoteStore,
        search_top_k: usize,
    ) -> Self {
        Self {
            searcher,
            resolver,
            people,
            votes,
            search_top_k,
        }
    }

    pub async fn dispatch(&self, call: &ToolCallRequest) -> Result<ToolOutcome, AgentError> {
        match call.name.as_str() {
            TOOL_SEARCH_RECORDS => self.search_records(call).await,
            TOOL_LIST_PEOPLE => self.list_people(call).await,
            TOOL_GET_VOTING_RECORD => self.get_voting_record(call).await,
            other => {
                warn!(tool = other, "model requested an unknown tool");
                Ok(ToolOutcome {
                    kind: ToolKind::Unknown,
                    payload: json!({
                        "status": "error",
                        "error": format!("no tool named '{other}'"),
                    }),
                    gap: true,
                })
            }
        }
    }

    async fn search_records(&self, call: &ToolCallRequest) -> Result<ToolOutcome, AgentError> {
        let args: SearchArgs = match parse_args(call) {
            Ok(args) => args,
            Err(outcome) => return Ok(outcome.with_kind(ToolKind::SearchRecords)),
        };
        let (date_from, date_to) = match parse_date_range(&args.date_from, &args.date_to) {
            Ok(range) => range,
            Err(outcome) => return Ok(outcome.with_kind(ToolKind::SearchRecords)),
        };
        let filter = SearchFilter {
            party: args.party,
            person_id: args.speaker_id,
            date_from,
            date_to,
        };

        let hits = match self
            .searcher
            .search(&args.query, &filter, self.search_top_k)
            .await
        {
            Ok(hits) => hits,
            Err(SearchError::Embedding(err)) => {
                warn!(error = %err, "search embedding failed");
                return Ok(ToolOutcome {
                    kind: ToolKind::SearchRecords,
                    payload: json!({
                        "status": "error",
                        "error": format!("search unavailable: {err}"),
                    }),
                    gap: true,
                });
            }
            Err(SearchError::Store(err)) => return Err(AgentError::Store(err)),
        };

        let results: Vec<Value> = hits.iter().map(hit_json).collect();
        Ok(ToolOutcome {
            kind: ToolKind::SearchRecords,
            payload: json!({
                "status": "ok",
                "result_count": results.len(),
                "results": results,
            }),
            gap: false,
        })
    }

    /// Wraps entity resolution. A no-match still offers loosely similar
    /// names so the model can recover from a misspelled mention.
    async fn list_people(&self, call: &ToolCallRequest) -> Result<ToolOutcome, AgentError> {
        let args: ListPeopleArgs = match parse_args(call) {
            Ok(args) => args,
            Err(outcome) => return Ok(outcome.with_kind(ToolKind::ListPeople)),
        };
        let payload = match self.resolver.resolve(&args.name).await? {
            Resolution::Match(profile) => json!({
                "status": "match",
                "person": profile_json(&profile),
            }),
            Resolution::Ambiguous(candidates) => {
                let listed: Vec<Value> = candidates.iter().map(profile_json).collect();
                json!({
                    "status": "ambiguous",
                    "mention": args.name,
                    "candidates": listed,
                    "guidance": "Several people match this name. Ask the user which one \
                                 they mean; do not pick one yourself.",
                })
            }
            Resolution::NoMatch => {
                let similar = self
                    .people
                    .list_people(Some(args.name.as_str()), SIMILAR_NAME_LIMIT)
                    .await?;
                let listed: Vec<Value> = similar.iter().map(profile_json).collect();
                json!({
                    "status": "no_match",
                    "mention": args.name,
                    "similar": listed,
                })
            }
        };
        Ok(ToolOutcome {
            kind: ToolKind::ListPeople,
            payload,
            gap: false,
        })
    }

    async fn get_voting_record(&self, call: &ToolCallRequest) -> Result<ToolOutcome, AgentError> {
        let args: VotingArgs = match parse_args(call) {
            Ok(args) => args,
            Err(outcome) => return Ok(outcome.with_kind(ToolKind::GetVotingRecord)),
        };
        let (date_from, date_to) = match parse_date_range(&args.date_from, &args.date_to) {
            Ok(range) => range,
            Err(outcome) => return Ok(outcome.with_kind(ToolKind::GetVotingRecord)),
        };

        let Some(profile) = self.people.profile(args.person_id).await? else {
            return Ok(ToolOutcome {
                kind: ToolKind::GetVotingRecord,
                payload: json!({
                    "status": "unknown_person_id",
                    "person_id": args.person_id,
                }),
                gap: false,
            });
        };

        let record = self
            .votes
            .voting_record(args.person_id, date_from, date_to, args.policy.as_deref())
            .await?;
        let events = serde_json::to_value(&record.events).unwrap_or_default();
        let alignments = serde_json::to_value(&record.alignments).unwrap_or_default();
        Ok(ToolOutcome {
            kind: ToolKind::GetVotingRecord,
            payload: json!({
                "status": "ok",
                "person": profile_json(&profile),
                "vote_count": record.events.len(),
                "events": events,
                "policy_alignment": alignments,
            }),
            gap: false,
        })
    }
}

/// Declares the tool surface offered to the planner.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: TOOL_SEARCH_RECORDS.to_string(),
            description: "Search debate records for relevant speeches. Returns excerpts with \
                          speaker, party at the time, office, date, and topic."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look for in the debate record"
                    },
                    "speaker_id": {
                        "type": "integer",
                        "description": "Restrict to speeches by this person id \
                                        (resolve names with list_people first)"
                    },
                    "party": {
                        "type": "string",
                        "description": "Restrict to speakers holding this party at the time"
                    },
                    "date_from": {
                        "type": "string",
                        "description": "Inclusive ISO date lower bound, e.g. 2023-01-01"
                    },
                    "date_to": {
                        "type": "string",
                        "description": "Inclusive ISO date upper bound"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: TOOL_LIST_PEOPLE.to_string(),
            description: "Resolve a person's name to their canonical id, latest party, and \
                          constituency. Reports every candidate when the name is ambiguous."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "The name as the user wrote it"
                    }
                },
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: TOOL_GET_VOTING_RECORD.to_string(),
            description: "Fetch a person's chronological division votes and how they align \
                          with tracked policies."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "person_id": {
                        "type": "integer",
                        "description": "Canonical person id from list_people"
                    },
                    "policy": {
                        "type": "string",
                        "description": "Restrict to one policy, by id or title fragment"
                    },
                    "date_from": {
                        "type": "string",
                        "description": "Inclusive ISO date lower bound"
                    },
                    "date_to": {
                        "type": "string",
                        "description": "Inclusive ISO date upper bound"
                    }
                },
                "required": ["person_id"]
            }),
        },
    ]
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    speaker_id: Option<i64>,
    #[serde(default)]
    party: Option<String>,
    #[serde(default)]
    date_from: Option<String>,
    #[serde(default)]
    date_to: Option<String>,
}

#[derive(Deserialize)]
struct ListPeopleArgs {
    name: String,
}

#[derive(Deserialize)]
struct VotingArgs {
    person_id: i64,
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    date_from: Option<String>,
    #[serde(default)]
    date_to: Option<String>,
}

/// Partially built outcome for argument failures; the caller stamps the kind.
struct GapOutcome {
    payload: Value,
}

impl GapOutcome {
    fn with_kind(self, kind: ToolKind) -> ToolOutcome {
        ToolOutcome {
            kind,
            payload: self.payload,
            gap: true,
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(call: &ToolCallRequest) -> Result<T, GapOutcome> {
    serde_json::from_value(call.arguments.clone()).map_err(|err| GapOutcome {
        payload: json!({
            "status": "error",
            "error": format!("invalid arguments: {err}"),
        }),
    })
}

fn parse_date_range(
    from: &Option<String>,
    to: &Option<String>,
) -> Result<(Option<NaiveDate>, Option<NaiveDate>), GapOutcome> {
    Ok((parse_date_arg(from)?, parse_date_arg(to)?))
}

fn parse_date_arg(arg: &Option<String>) -> Result<Option<NaiveDate>, GapOutcome> {
    match arg {
        None => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| GapOutcome {
                payload: json!({
                    "status": "error",
                    "error": format!("'{text}' is not an ISO date (expected YYYY-MM-DD)"),
                }),
            }),
    }
}

fn profile_json(profile: &PersonProfile) -> Value {
    json!({
        "person_id": profile.id,
        "name": profile.canonical_name,
        "party": profile.party,
        "constituency": profile.constituency,
    })
}

fn hit_json(hit: &SearchHit) -> Value {
    let chunk = &hit.chunk;
    json!({
        "text": chunk.text,
        "speaker": chunk.speaker_name,
        "speaker_id": chunk.person_id,
        "party": chunk.party,
        "office": chunk.office,
        "date": chunk.date.to_string(),
        "topic": chunk.topic_line(),
        "debate_id": chunk.debate_id,
        "summarized": chunk.summarized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::chunking::DebateChunk;
    use crate::providers::{Embedder, ProviderError};
    use crate::store::{Database, PersonRecord};
    use tempfile::tempdir;

    /// Maps text onto a 3-dim vector from letter frequencies, so tests get
    /// stable, offline similarities.
    struct CountingEmbedder;

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            "test-embed"
        }

        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lower = text.to_lowercase();
                    let a = lower.matches('a').count() as f32;
                    let e = lower.matches('e').count() as f32;
                    let o = lower.matches('o').count() as f32;
                    let norm = (a * a + e * e + o * o).sqrt().max(1.0);
                    vec![a / norm, e / norm, o / norm]
                })
                .collect())
        }
    }

    async fn seeded_context() -> (tempfile::TempDir, ToolContext) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("tools.db"), "test-embed", 3)
            .await
            .unwrap();
        let people = db.people();
        people
            .upsert_people(vec![
                PersonRecord {
                    id: 10001,
                    canonical_name: "John Smith".to_string(),
                },
                PersonRecord {
                    id: 10002,
                    canonical_name: "Jane Smith".to_string(),
                },
            ])
            .await
            .unwrap();

        let corpus = db.corpus();
        let chunk = DebateChunk {
            id: "c-1".to_string(),
            debate_id: "debates2024-01-10a".to_string(),
            chunk_index: 0,
            text: "We must lift the onshore wind ban.".to_string(),
            embedding_text: "We must lift the onshore wind ban.".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            speaker_name: Some("John Smith".to_string()),
            person_id: Some(10001),
            office: None,
            party: Some("Labour".to_string()),
            topic_path: vec!["Energy".to_string()],
            first_seq: 0,
            last_seq: 0,
            source_seqs: vec![0],
            question_seq: None,
            summarized: false,
            overlap_tokens: 0,
        };
        let embedder = Arc::new(CountingEmbedder);
        let vectors = embedder.embed(&[chunk.text.clone()]).await.unwrap();
        corpus
            .commit_debate(
                "debates2024-01-10a".to_string(),
                NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
                "debates2024-01-10a.xml".to_string(),
                vec![chunk],
                vectors,
            )
            .await
            .unwrap();

        let searcher = HybridSearcher::new(db.corpus(), embedder, 50);
        let resolver = EntityResolver::new(db.people());
        let ctx = ToolContext::new(searcher, resolver, db.people(), db.votes(), 10);
        (dir, ctx)
    }

    fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn search_returns_cited_results() {
        let (_dir, ctx) = seeded_context().await;
        let outcome = ctx
            .dispatch(&call(
                TOOL_SEARCH_RECORDS,
                json!({"query": "onshore wind ban"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.kind, ToolKind::SearchRecords);
        assert!(!outcome.gap);
        assert_eq!(outcome.payload["status"], "ok");
        let first = &outcome.payload["results"][0];
        assert_eq!(first["speaker"], "John Smith");
        assert_eq!(first["party"], "Labour");
        assert_eq!(first["date"], "2024-01-10");
    }

    #[tokio::test]
    async fn search_respects_speaker_id_filter() {
        let (_dir, ctx) = seeded_context().await;
        let outcome = ctx
            .dispatch(&call(
                TOOL_SEARCH_RECORDS,
                json!({"query": "onshore wind", "speaker_id": 10002}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.payload["result_count"], 0);

        let outcome = ctx
            .dispatch(&call(
                TOOL_SEARCH_RECORDS,
                json!({"query": "onshore wind", "speaker_id": 10001}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.payload["result_count"], 1);
    }

    #[tokio::test]
    async fn ambiguous_name_is_surfaced_not_guessed() {
        let (_dir, ctx) = seeded_context().await;
        let outcome = ctx
            .dispatch(&call(TOOL_LIST_PEOPLE, json!({"name": "Smith"})))
            .await
            .unwrap();
        assert_eq!(outcome.kind, ToolKind::ListPeople);
        assert_eq!(outcome.payload["status"], "ambiguous");
        assert_eq!(outcome.payload["candidates"].as_array().unwrap().len(), 2);
        assert!(!outcome.gap);
    }

    #[tokio::test]
    async fn unique_name_resolves_to_a_match() {
        let (_dir, ctx) = seeded_context().await;
        let outcome = ctx
            .dispatch(&call(TOOL_LIST_PEOPLE, json!({"name": "John Smith"})))
            .await
            .unwrap();
        assert_eq!(outcome.payload["status"], "match");
        assert_eq!(outcome.payload["person"]["person_id"], 10001);
    }

    #[tokio::test]
    async fn bad_dates_and_bad_args_become_gaps() {
        let (_dir, ctx) = seeded_context().await;
        let outcome = ctx
            .dispatch(&call(
                TOOL_SEARCH_RECORDS,
                json!({"query": "wind", "date_from": "last tuesday"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.payload["status"], "error");
        assert!(outcome.gap);

        let outcome = ctx
            .dispatch(&call(TOOL_GET_VOTING_RECORD, json!({"nonsense": true})))
            .await
            .unwrap();
        assert_eq!(outcome.payload["status"], "error");
        assert!(outcome.gap);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_gap() {
        let (_dir, ctx) = seeded_context().await;
        let outcome = ctx
            .dispatch(&call("drop_tables", json!({})))
            .await
            .unwrap();
        assert_eq!(outcome.kind, ToolKind::Unknown);
        assert!(outcome.gap);
    }

    #[tokio::test]
    async fn voting_record_for_unknown_id_reports_cleanly() {
        let (_dir, ctx) = seeded_context().await;
        let outcome = ctx
            .dispatch(&call(TOOL_GET_VOTING_RECORD, json!({"person_id": 99999})))
            .await
            .unwrap();
        assert_eq!(outcome.payload["status"], "unknown_person_id");
        assert!(!outcome.gap);
    }

    #[tokio::test]
    async fn voting_record_includes_person_header() {
        let (_dir, ctx) = seeded_context().await;
        let outcome = ctx
            .dispatch(&call(TOOL_GET_VOTING_RECORD, json!({"person_id": 10001})))
            .await
            .unwrap();
        assert_eq!(outcome.payload["status"], "ok");
        assert_eq!(outcome.payload["person"]["name"], "John Smith");
        assert_eq!(outcome.payload["vote_count"], 0);
    }
}
