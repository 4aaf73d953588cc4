//! Shared metadata filters for both search branches.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Filter applied identically to the vector and lexical branches. All fields
/// are conjunctive; date bounds are inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
}

impl SearchFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.party.is_none()
            && self.person_id.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }
}

/// Rewrites free text into a safe FTS5 MATCH expression.
///
/// Every alphanumeric term is quoted so user input can never smuggle in
/// column filters or boolean operators; terms are OR-joined to keep recall
/// high ahead of rank fusion. Returns `None` when nothing survives.
pub fn sanitize_match_query(raw: &str) -> Option<String> {
    let terms: Vec<String> = raw
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
