//! Transcript source discovery.
//!
//! Debate files are named `debates<date><rev>.xml`, where `<rev>` is a
//! single-letter revision suffix bumped when a sitting's transcript is
//! republished. Discovery keeps only the newest revision per sitting date
//! so re-published days do not ingest twice.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::warn;

use super::parser::TranscriptError;

/// A transcript file selected for ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// File stem, used as the debate id and the checkpoint key.
    pub debate_id: String,
    /// Sitting date extracted from the file name.
    pub date: NaiveDate,
    /// Revision letter, empty when the name carries none.
    pub revision: String,
}

/// Scans `dir` for transcript files and returns one [`SourceFile`] per
/// sitting date, newest revision wins, sorted by date.
///
/// Files whose names do not carry a parseable date are skipped with a
/// warning rather than failing the run.
pub fn discover_sources(dir: &Path) -> Result<Vec<SourceFile>, TranscriptError> {
    let name_pattern = Regex::new(r"^debates(\d{4}-\d{2}-\d{2})([a-z]?)\.xml$")
        .map_err(|err| TranscriptError::Internal {
            message: err.to_string(),
        })?;

    let entries = std::fs::read_dir(dir).map_err(|source| TranscriptError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut latest: FxHashMap<NaiveDate, SourceFile> = FxHashMap::default();
    for entry in entries {
        let entry = entry.map_err(|source| TranscriptError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".xml") {
            continue;
        }
        let Some(caps) = name_pattern.captures(name) else {
            warn!(file = name, "transcript file name carries no sitting date, skipping");
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") else {
            warn!(file = name, "transcript file name date is invalid, skipping");
            continue;
        };
        let revision = caps[2].to_string();
        let debate_id = name.trim_end_matches(".xml").to_string();
        let candidate = SourceFile {
            path,
            debate_id,
            date,
            revision,
        };
        match latest.get(&date) {
            Some(existing) if existing.revision >= candidate.revision => {}
            _ => {
                latest.insert(date, candidate);
            }
        }
    }

    let mut sources: Vec<SourceFile> = latest.into_values().collect();
    sources.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(sources)
}
