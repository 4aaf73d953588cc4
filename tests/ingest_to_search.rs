//! End-to-end ingestion and retrieval over a real on-disk index.
//!
//! Transcripts go through the full pipeline (parse, chunk, party stamping,
//! embed, commit) with a deterministic topic-axis embedder, then hybrid
//! search runs against the committed corpus. Suitable for CI: no network,
//! no model calls.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::{TempDir, tempdir};

use debatesmith::ingest::{DebatePipeline, MetadataSet};
use debatesmith::providers::{
    ChatModel, Embedder, PlanOutcome, PromptMessage, ProviderError, TokenStream, ToolSpec,
};
use debatesmith::retrieval::{HybridSearcher, SearchFilter};
use debatesmith::settings::Settings;
use debatesmith::store::{Database, MembershipRecord, PersonRecord};

struct NullChat;

#[async_trait]
impl ChatModel for NullChat {
    async fn plan(
        &self,
        _history: &[PromptMessage],
        _tools: &[ToolSpec],
    ) -> Result<PlanOutcome, ProviderError> {
        unimplemented!("not used by ingestion")
    }

    async fn stream_answer(
        &self,
        _history: &[PromptMessage],
    ) -> Result<TokenStream, ProviderError> {
        unimplemented!("not used by ingestion")
    }

    async fn complete(&self, _history: &[PromptMessage]) -> Result<String, ProviderError> {
        Ok("A concise summary.".to_string())
    }
}

/// Four axes: wind, rail, housing, and a constant so no vector is zero.
/// Texts about the same topic land near each other, which makes vector
/// ranking predictable without a model.
struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    fn model_id(&self) -> &str {
        "test-embed"
    }

    fn dimensions(&self) -> usize {
        4
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let axis = |word: &str| if lower.contains(word) { 1.0f32 } else { 0.0 };
                let raw = [axis("wind"), axis("rail"), axis("housing"), 0.1];
                let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
                raw.iter().map(|v| v / norm).collect()
            })
            .collect())
    }
}

const WIND_DEBATE: &str = r#"<publicwhip>
  <major-heading>Energy Policy</major-heading>
  <speech id="a.1" speakername="John Smith" person_id="uk.org.publicwhip/person/10001">
    <p>We must lift the onshore wind ban across England without further delay.</p>
  </speech>
  <speech id="a.2" speakername="Jane Smith" person_id="uk.org.publicwhip/person/10002">
    <p>Wind farms achieve nothing until the grid connects them.</p>
  </speech>
</publicwhip>"#;

const RAIL_DEBATE: &str = r#"<publicwhip>
  <major-heading>Transport</major-heading>
  <speech id="b.1" speakername="John Smith" person_id="uk.org.publicwhip/person/10001">
    <p>The rail electrification budget has been frozen for three years.</p>
  </speech>
</publicwhip>"#;

const HOUSING_DEBATE: &str = r#"<publicwhip>
  <major-heading>Levelling Up</major-heading>
  <speech id="c.1" speakername="Tom Brown" person_id="uk.org.publicwhip/person/10003">
    <p>Housing targets are missed in every region of the country.</p>
  </speech>
</publicwhip>"#;

fn metadata() -> MetadataSet {
    MetadataSet {
        people: vec![
            PersonRecord {
                id: 10001,
                canonical_name: "John Smith".to_string(),
            },
            PersonRecord {
                id: 10002,
                canonical_name: "Jane Smith".to_string(),
            },
            PersonRecord {
                id: 10003,
                canonical_name: "Tom Brown".to_string(),
            },
        ],
        memberships: vec![
            MembershipRecord {
                id: "m-10001".to_string(),
                person_id: 10001,
                party: Some("Labour".to_string()),
                constituency: Some("Example North".to_string()),
                start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                end_date: None,
            },
            MembershipRecord {
                id: "m-10002".to_string(),
                person_id: 10002,
                party: Some("Conservative".to_string()),
                constituency: Some("Example South".to_string()),
                start_date: NaiveDate::from_ymd_opt(2019, 12, 12).unwrap(),
                end_date: None,
            },
        ],
        ..MetadataSet::default()
    }
}

fn settings(root: &Path) -> Settings {
    Settings {
        database_path: root.join("corpus.db"),
        transcripts_dir: root.join("transcripts"),
        metadata_dir: root.join("metadata"),
        summary_cache_path: root.join("summaries.json"),
        embedding_model: "test-embed".to_string(),
        embedding_dim: 4,
        ..Settings::default()
    }
}

async fn seeded_index(dir: &TempDir) -> (Database, Settings) {
    let transcripts = dir.path().join("transcripts");
    std::fs::create_dir_all(&transcripts).unwrap();
    std::fs::write(transcripts.join("debates2023-06-15a.xml"), RAIL_DEBATE).unwrap();
    std::fs::write(transcripts.join("debates2024-01-10a.xml"), WIND_DEBATE).unwrap();
    std::fs::write(transcripts.join("debates2024-03-05a.xml"), HOUSING_DEBATE).unwrap();

    let settings = settings(dir.path());
    let db = Database::open(&settings.database_path, "test-embed", 4)
        .await
        .unwrap();
    let pipeline = DebatePipeline::new(&db, Arc::new(NullChat), Arc::new(TopicEmbedder), &settings)
        .await
        .unwrap();
    pipeline.apply_metadata(metadata()).await.unwrap();
    let report = pipeline.run(&settings.transcripts_dir).await.unwrap();
    assert_eq!(report.ingested, 3);
    assert_eq!(report.failed, 0);
    (db, settings)
}

fn searcher(db: &Database) -> HybridSearcher {
    HybridSearcher::new(db.corpus(), Arc::new(TopicEmbedder), 50)
}

#[tokio::test]
async fn hybrid_search_surfaces_topical_chunks() {
    let dir = tempdir().unwrap();
    let (db, _settings) = seeded_index(&dir).await;

    let hits = searcher(&db)
        .search("onshore wind ban", &SearchFilter::default(), 5)
        .await
        .unwrap();

    assert!(!hits.is_empty());
    assert!(hits[0].chunk.text.contains("onshore wind ban"));
    assert!(hits[0].score > 0.0);
    // Both wind chunks outrank the rail and housing ones.
    let wind_hits = hits
        .iter()
        .take(2)
        .filter(|h| h.chunk.text.to_lowercase().contains("wind"))
        .count();
    assert_eq!(wind_hits, 2);
}

#[tokio::test]
async fn party_filter_only_returns_matching_chunks() {
    let dir = tempdir().unwrap();
    let (db, _settings) = seeded_index(&dir).await;

    let filter = SearchFilter {
        party: Some("Labour".to_string()),
        ..SearchFilter::default()
    };
    let hits = searcher(&db).search("wind", &filter, 10).await.unwrap();

    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.chunk.party.as_deref(), Some("Labour"));
    }
    // Jane Smith's wind chunk is Conservative and must not leak through.
    assert!(hits.iter().all(|h| h.chunk.person_id == Some(10001)));
}

#[tokio::test]
async fn date_range_filter_excludes_out_of_range_sittings() {
    let dir = tempdir().unwrap();
    let (db, _settings) = seeded_index(&dir).await;

    let filter = SearchFilter {
        date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
        ..SearchFilter::default()
    };
    let hits = searcher(&db)
        .search("rail electrification", &filter, 10)
        .await
        .unwrap();

    // The only rail chunk is from 2023.
    assert!(
        hits.iter()
            .all(|h| !h.chunk.text.contains("rail electrification"))
    );

    let unbounded = searcher(&db)
        .search("rail electrification", &SearchFilter::default(), 10)
        .await
        .unwrap();
    assert!(unbounded[0].chunk.text.contains("rail electrification"));
    assert_eq!(
        unbounded[0].chunk.date,
        NaiveDate::from_ymd_opt(2023, 6, 15).unwrap()
    );
}

#[tokio::test]
async fn speaker_filter_pins_results_to_one_person() {
    let dir = tempdir().unwrap();
    let (db, _settings) = seeded_index(&dir).await;

    let filter = SearchFilter {
        person_id: Some(10002),
        ..SearchFilter::default()
    };
    let hits = searcher(&db).search("wind", &filter, 10).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.speaker_name.as_deref(), Some("Jane Smith"));
    assert_eq!(hits[0].chunk.party.as_deref(), Some("Conservative"));
}

#[tokio::test]
async fn repeated_searches_return_identical_rankings() {
    let dir = tempdir().unwrap();
    let (db, _settings) = seeded_index(&dir).await;
    let searcher = searcher(&db);

    let first = searcher
        .search("wind", &SearchFilter::default(), 10)
        .await
        .unwrap();
    let second = searcher
        .search("wind", &SearchFilter::default(), 10)
        .await
        .unwrap();

    let first_ids: Vec<&str> = first.iter().map(|h| h.chunk.id.as_str()).collect();
    let second_ids: Vec<&str> = second.iter().map(|h| h.chunk.id.as_str()).collect();
    assert_eq!(first_ids, second_ids);
    for (a, b) in first.iter().zip(&second) {
        assert!((a.score - b.score).abs() < f64::EPSILON);
    }
}

#[tokio::test]
async fn rerunning_the_pipeline_leaves_the_index_unchanged() {
    let dir = tempdir().unwrap();
    let (db, settings) = seeded_index(&dir).await;
    let before = db.corpus().total_chunks().await.unwrap();

    let pipeline = DebatePipeline::new(&db, Arc::new(NullChat), Arc::new(TopicEmbedder), &settings)
        .await
        .unwrap();
    let rerun = pipeline.run(&settings.transcripts_dir).await.unwrap();

    assert_eq!(rerun.ingested, 0);
    assert_eq!(rerun.skipped, 3);
    assert_eq!(db.corpus().total_chunks().await.unwrap(), before);
}
