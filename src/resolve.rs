//! Resolves free-text name mentions against known people.
//!
//! The resolver never guesses. One plausible person is a [`Resolution::Match`],
//! several become [`Resolution::Ambiguous`] with every candidate listed so the
//! caller can ask the user, and none is [`Resolution::NoMatch`]. Candidates
//! carry their latest party and constituency so a disambiguation prompt can
//! describe them usefully.

use tracing::debug;

use crate::store::{PeopleStore, PersonProfile, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Match(PersonProfile),
    Ambiguous(Vec<PersonProfile>),
    NoMatch,
}

pub struct EntityResolver {
    people: PeopleStore,
}

impl EntityResolver {
    pub fn new(people: PeopleStore) -> Self {
        Self { people }
    }

    /// Resolves a mention in two passes: whole-string equality against names
    /// and aliases first, then whole-word containment. Substring hits inside
    /// a longer word ("smith" in "Goldsmith") never count.
    pub async fn resolve(&self, mention: &str) -> Result<Resolution, StoreError> {
        let mention = mention.trim();
        if mention.is_empty() {
            return Ok(Resolution::NoMatch);
        }

        let exact = self.people.find_exact(mention).await?;
        if exact.len() > 1 {
            return Ok(Resolution::Ambiguous(exact));
        }
        if let Some(candidate) = exact.into_iter().next() {
            return Ok(Resolution::Match(candidate));
        }

        let needle = mention.to_lowercase();
        let mut candidates = Vec::new();
        for profile in self.people.find_containing(mention).await? {
            if contains_word(&profile.canonical_name.to_lowercase(), &needle) {
                candidates.push(profile);
                continue;
            }
            let aliases = self.people.aliases_of(profile.id).await?;
            if aliases
                .iter()
                .any(|alias| contains_word(&alias.to_lowercase(), &needle))
            {
                candidates.push(profile);
            }
        }
        debug!(mention, candidates = candidates.len(), "mention resolved");

        if candidates.len() > 1 {
            return Ok(Resolution::Ambiguous(candidates));
        }
        match candidates.into_iter().next() {
            Some(candidate) => Ok(Resolution::Match(candidate)),
            None => Ok(Resolution::NoMatch),
        }
    }
}

/// True when `needle` occurs in `text` bounded by non-alphanumerics.
fn contains_word(text: &str, needle: &str) -> bool {
    for (index, matched) in text.match_indices(needle) {
        let before_ok = text[..index]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let end = index + matched.len();
        let after_ok = text[end..].chars().next().is_none_or(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
    }
    false
}
