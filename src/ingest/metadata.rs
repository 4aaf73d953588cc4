//! Member and division metadata loaders.
//!
//! Metadata ships as JSON exports alongside the transcripts: a `people.json`
//! in the register format (a `persons` array plus a flat `memberships`
//! array), and `divisions.json` / `votes.json` / `policies.json` with the
//! division lobby data. Each file is optional; a missing or malformed file
//! contributes nothing and the run carries on with what it has.

use std::path::Path;

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::store::{
    DivisionRecord, MembershipRecord, PersonRecord, PolicyDirection, PolicyLink, PolicyRecord,
    VoteChoice, VoteRecord,
};

use super::IngestError;

/// Everything the metadata files contribute, ready for the store.
#[derive(Debug, Default)]
pub struct MetadataSet {
    pub people: Vec<PersonRecord>,
    pub aliases: Vec<(i64, String)>,
    pub memberships: Vec<MembershipRecord>,
    pub divisions: Vec<DivisionRecord>,
    pub policies: Vec<PolicyRecord>,
    pub policy_links: Vec<PolicyLink>,
    pub votes: Vec<VoteRecord>,
}

impl MetadataSet {
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
            && self.memberships.is_empty()
            && self.divisions.is_empty()
            && self.policies.is_empty()
            && self.votes.is_empty()
    }
}

/// Reads whichever metadata files exist under `dir`.
pub async fn load_metadata(dir: &Path) -> Result<MetadataSet, IngestError> {
    let mut set = MetadataSet::default();

    if let Some(raw) = read_optional(&dir.join("people.json")).await? {
        match serde_json::from_str::<PeopleFile>(&raw) {
            Ok(file) => {
                let (people, aliases, memberships) = people_from(file);
                validate_memberships(&memberships);
                set.people = people;
                set.aliases = aliases;
                set.memberships = memberships;
            }
            Err(err) => warn!(error = %err, "people.json is malformed, skipping it"),
        }
    }

    if let Some(raw) = read_optional(&dir.join("divisions.json")).await? {
        match serde_json::from_str::<Vec<RawDivision>>(&raw) {
            Ok(rows) => set.divisions = divisions_from(rows),
            Err(err) => warn!(error = %err, "divisions.json is malformed, skipping it"),
        }
    }

    if let Some(raw) = read_optional(&dir.join("policies.json")).await? {
        match serde_json::from_str::<Vec<RawPolicy>>(&raw) {
            Ok(rows) => {
                let (policies, links) = policies_from(rows);
                set.policies = policies;
                set.policy_links = links;
            }
            Err(err) => warn!(error = %err, "policies.json is malformed, skipping it"),
        }
    }

    if let Some(raw) = read_optional(&dir.join("votes.json")).await? {
        match serde_json::from_str::<Vec<RawVote>>(&raw) {
            Ok(rows) => set.votes = votes_from(rows),
            Err(err) => warn!(error = %err, "votes.json is malformed, skipping it"),
        }
    }

    info!(
        people = set.people.len(),
        aliases = set.aliases.len(),
        memberships = set.memberships.len(),
        divisions = set.divisions.len(),
        policies = set.policies.len(),
        votes = set.votes.len(),
        "loaded metadata"
    );
    Ok(set)
}

async fn read_optional(path: &Path) -> Result<Option<String>, IngestError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "metadata file not present");
            Ok(None)
        }
        Err(err) => Err(IngestError::Metadata {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct PeopleFile {
    #[serde(default)]
    persons: Vec<RawPerson>,
    #[serde(default)]
    memberships: Vec<RawMembership>,
}

#[derive(Debug, Deserialize)]
struct RawPerson {
    id: IdRef,
    #[serde(default)]
    redirect: Option<String>,
    #[serde(default)]
    other_names: Vec<RawName>,
}

#[derive(Debug, Default, Deserialize)]
struct RawName {
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    additional_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    surname: Option<String>,
    #[serde(default)]
    lordname: Option<String>,
    #[serde(default)]
    honorific_prefix: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMembership {
    #[serde(default)]
    id: Option<String>,
    person_id: IdRef,
    #[serde(default)]
    on_behalf_of_id: Option<String>,
    #[serde(default)]
    constituency: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDivision {
    #[serde(alias = "id")]
    key: String,
    date: String,
    #[serde(alias = "title")]
    division_name: String,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    id: IdRef,
    title: String,
    #[serde(default)]
    divisions: Vec<RawPolicyDivision>,
}

#[derive(Debug, Deserialize)]
struct RawPolicyDivision {
    #[serde(alias = "key")]
    division_key: String,
    direction: String,
}

#[derive(Debug, Deserialize)]
struct RawVote {
    #[serde(alias = "division_id")]
    division_key: String,
    person_id: IdRef,
    #[serde(alias = "effective_vote")]
    vote: String,
}

/// A person reference as it appears in the files: either a bare number or a
/// register URI like `uk.org.publicwhip/person/10001`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdRef {
    Num(i64),
    Text(String),
}

impl IdRef {
    fn as_person_id(&self) -> Option<i64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Text(s) => s.rsplit('/').next()?.parse().ok(),
        }
    }

    fn as_key(&self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

fn people_from(
    file: PeopleFile,
) -> (Vec<PersonRecord>, Vec<(i64, String)>, Vec<MembershipRecord>) {
    let mut people = Vec::new();
    let mut aliases = Vec::new();

    for person in &file.persons {
        if person.redirect.is_some() {
            continue;
        }
        let Some(id) = person.id.as_person_id() else {
            debug!(id = ?person.id, "person id is not parseable, skipping");
            continue;
        };
        let Some(canonical) = reconcile_name(&person.other_names) else {
            debug!(person_id = id, "person has no usable name, skipping");
            continue;
        };

        let mut seen: FxHashSet<String> = FxHashSet::default();
        for name in &person.other_names {
            for variant in name_variants(name) {
                if variant.eq_ignore_ascii_case(&canonical) {
                    continue;
                }
                if seen.insert(variant.to_ascii_lowercase()) {
                    aliases.push((id, variant));
                }
            }
        }
        people.push(PersonRecord {
            id,
            canonical_name: canonical,
        });
    }

    let mut memberships = Vec::new();
    for raw in file.memberships {
        let Some(person_id) = raw.person_id.as_person_id() else {
            debug!(id = ?raw.id, "membership person id is not parseable, skipping");
            continue;
        };
        let Some(start) = raw.start_date.as_deref().and_then(parse_loose_date) else {
            warn!(id = ?raw.id, person_id, "membership has no usable start date, skipping");
            continue;
        };
        // An unparseable end date is treated as a still-open seat.
        let end = raw.end_date.as_deref().and_then(parse_loose_date);
        let id = raw
            .id
            .unwrap_or_else(|| format!("membership/{person_id}/{start}"));
        memberships.push(MembershipRecord {
            id,
            person_id,
            party: raw
                .on_behalf_of_id
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(party_display),
            constituency: raw.constituency.filter(|c| !c.is_empty()),
            start_date: start,
            end_date: end,
        });
    }

    (people, aliases, memberships)
}

/// Picks the display name: the latest record marked `Main`, falling back to
/// the first record of any kind.
fn reconcile_name(names: &[RawName]) -> Option<String> {
    let mut main: Vec<&RawName> = names
        .iter()
        .filter(|n| n.note.as_deref() == Some("Main"))
        .collect();
    main.sort_by(|a, b| b.start_date.cmp(&a.start_date));
    let pick = main.first().copied().or_else(|| names.first())?;
    display_name(pick)
}

fn display_name(name: &RawName) -> Option<String> {
    let given = name
        .given_name
        .clone()
        .or_else(|| name.additional_name.clone())
        .or_else(|| first_word(name.name.as_deref()));
    let family = name
        .family_name
        .clone()
        .or_else(|| name.surname.clone())
        .or_else(|| name.lordname.clone())
        .or_else(|| last_word(name.name.as_deref()))?;
    let honorific = name
        .honorific_prefix
        .as_deref()
        .filter(|h| !h.is_empty());
    match (honorific, given) {
        (Some(h), _) => Some(format!("{h} {family}")),
        (None, Some(g)) => Some(format!("{g} {family}")),
        (None, None) => Some(family),
    }
}

/// Every way this record could plausibly be written in a transcript.
fn name_variants(name: &RawName) -> Vec<String> {
    let mut variants = Vec::new();
    if let Some(full) = name.name.as_deref() {
        let full = full.trim();
        if !full.is_empty() {
            variants.push(full.to_string());
        }
    }
    if let Some(display) = display_name(name) {
        variants.push(display);
    }
    if let (Some(given), Some(family)) = (
        name.given_name.as_deref(),
        name.family_name
            .as_deref()
            .or(name.surname.as_deref())
            .or(name.lordname.as_deref()),
    ) {
        variants.push(format!("{given} {family}"));
    }
    variants
}

fn first_word(name: Option<&str>) -> Option<String> {
    name?.split_whitespace().next().map(str::to_string)
}

fn last_word(name: Option<&str>) -> Option<String> {
    name?.split_whitespace().next_back().map(str::to_string)
}

/// Warns about memberships for the same person whose intervals overlap.
/// Both rows are kept; party-at-date lookups resolve ties by latest start.
fn validate_memberships(memberships: &[MembershipRecord]) {
    let mut by_person: FxHashMap<i64, Vec<&MembershipRecord>> = FxHashMap::default();
    for membership in memberships {
        by_person.entry(membership.person_id).or_default().push(membership);
    }
    for (person_id, mut rows) in by_person {
        rows.sort_by_key(|m| m.start_date);
        for pair in rows.windows(2) {
            let open_ended = pair[0].end_date.is_none();
            let runs_past = pair[0].end_date.is_some_and(|end| end >= pair[1].start_date);
            if open_ended || runs_past {
                warn!(
                    person_id,
                    first = %pair[0].id,
                    second = %pair[1].id,
                    "overlapping membership intervals, keeping both"
                );
            }
        }
    }
}

fn divisions_from(rows: Vec<RawDivision>) -> Vec<DivisionRecord> {
    let mut divisions = Vec::new();
    for row in rows {
        let Some(date) = parse_loose_date(&row.date) else {
            warn!(key = %row.key, date = %row.date, "division has no usable date, skipping");
            continue;
        };
        divisions.push(DivisionRecord {
            id: row.key,
            date,
            title: row.division_name,
        });
    }
    divisions
}

fn policies_from(rows: Vec<RawPolicy>) -> (Vec<PolicyRecord>, Vec<PolicyLink>) {
    let mut policies = Vec::new();
    let mut links = Vec::new();
    for row in rows {
        let policy_id = row.id.as_key();
        for division in row.divisions {
            let Some(direction) = PolicyDirection::parse(&division.direction.to_lowercase())
            else {
                warn!(
                    policy = %policy_id,
                    division = %division.division_key,
                    direction = %division.direction,
                    "unknown policy direction, skipping link"
                );
                continue;
            };
            links.push(PolicyLink {
                division_id: division.division_key,
                policy_id: policy_id.clone(),
                direction,
            });
        }
        policies.push(PolicyRecord {
            id: policy_id,
            title: row.title,
        });
    }
    (policies, links)
}

fn votes_from(rows: Vec<RawVote>) -> Vec<VoteRecord> {
    let mut votes = Vec::new();
    for row in rows {
        let Some(person_id) = row.person_id.as_person_id() else {
            debug!(division = %row.division_key, "vote person id is not parseable, skipping");
            continue;
        };
        let Some((choice, teller)) = normalize_vote(&row.vote) else {
            warn!(
                division = %row.division_key,
                person_id,
                vote = %row.vote,
                "unknown vote value, skipping"
            );
            continue;
        };
        votes.push(VoteRecord {
            division_id: row.division_key,
            person_id,
            choice,
            teller,
        });
    }
    votes
}

/// Folds teller variants into the plain lobby and marks the teller flag.
/// `abstain` is an alias some exports use for voting in both lobbies.
fn normalize_vote(raw: &str) -> Option<(VoteChoice, bool)> {
    match raw.to_lowercase().as_str() {
        "tellaye" => Some((VoteChoice::Aye, true)),
        "tellno" => Some((VoteChoice::No, true)),
        "abstain" | "abstention" => Some((VoteChoice::Both, false)),
        other => VoteChoice::parse(other).map(|choice| (choice, false)),
    }
}

/// Accepts the register's partial dates: a bare year means 1 January, a
/// year-month means the first of that month.
fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d") {
        return Some(date);
    }
    NaiveDate::parse_from_str(&format!("{raw}-01-01"), "%Y-%m-%d").ok()
}

/// Maps register party slugs to the display form used in filters and
/// citations, e.g. `liberal-democrat` becomes `Liberal Democrat`.
fn party_display(slug: &str) -> String {
    match slug {
        "dup" => "DUP".to_string(),
        "sdlp" => "SDLP".to_string(),
        "snp" | "scottish-national-party" => "Scottish National Party".to_string(),
        "ukip" => "UKIP".to_string(),
        "uup" => "UUP".to_string(),
        "labourco-operative" => "Labour/Co-operative".to_string(),
        "sinn-fein" => "Sinn Fein".to_string(),
        other => other
            .split(['-', ' '])
            .filter(|word| !word.is_empty())
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn load_fixture(files: &[(&str, &str)]) -> MetadataSet {
        let dir = tempdir().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        load_metadata(dir.path()).await.unwrap()
    }

    const PEOPLE: &str = r#"{
      "persons": [
        {
          "id": "uk.org.publicwhip/person/10001",
          "other_names": [
            {"note": "Main", "given_name": "Harriet", "family_name": "Harman",
             "start_date": "1982-01-01"},
            {"note": "Alternate", "name": "Harriet Ruth Harman"}
          ]
        },
        {
          "id": "uk.org.publicwhip/person/10002",
          "other_names": [
            {"note": "Main", "honorific_prefix": "Lord", "lordname": "Janvrin"}
          ]
        },
        {"id": "uk.org.publicwhip/person/10003", "redirect": "uk.org.publicwhip/person/10001"}
      ],
      "memberships": [
        {"id": "m1", "person_id": "uk.org.publicwhip/person/10001",
         "on_behalf_of_id": "labour", "constituency": "Camberwell and Peckham",
         "start_date": "2015-05", "end_date": "2017-05-03"},
        {"id": "m2", "person_id": "uk.org.publicwhip/person/10001",
         "on_behalf_of_id": "labour", "start_date": "2017-06-08"}
      ]
    }"#;

    #[tokio::test]
    async fn people_are_reconciled_with_aliases() {
        let set = load_fixture(&[("people.json", PEOPLE)]).await;

        assert_eq!(set.people.len(), 2);
        let harman = set.people.iter().find(|p| p.id == 10001).unwrap();
        assert_eq!(harman.canonical_name, "Harriet Harman");
        let lord = set.people.iter().find(|p| p.id == 10002).unwrap();
        assert_eq!(lord.canonical_name, "Lord Janvrin");

        assert!(
            set.aliases
                .iter()
                .any(|(id, alias)| *id == 10001 && alias == "Harriet Ruth Harman")
        );
        assert!(set.aliases.iter().all(|(_, alias)| alias != "Harriet Harman"));
    }

    #[tokio::test]
    async fn memberships_accept_partial_dates_and_display_parties() {
        let set = load_fixture(&[("people.json", PEOPLE)]).await;

        assert_eq!(set.memberships.len(), 2);
        let first = set.memberships.iter().find(|m| m.id == "m1").unwrap();
        assert_eq!(
            first.start_date,
            NaiveDate::from_ymd_opt(2015, 5, 1).unwrap()
        );
        assert_eq!(first.party.as_deref(), Some("Labour"));
        assert_eq!(first.constituency.as_deref(), Some("Camberwell and Peckham"));
        let second = set.memberships.iter().find(|m| m.id == "m2").unwrap();
        assert_eq!(second.end_date, None);
    }

    #[tokio::test]
    async fn votes_fold_tellers_and_abstentions() {
        let votes = r#"[
          {"division_key": "pw-2024-01-10-33", "person_id": 10001, "vote": "aye"},
          {"division_key": "pw-2024-01-10-33", "person_id": 10002, "vote": "tellno"},
          {"division_key": "pw-2024-01-10-33", "person_id": 10004, "vote": "abstain"},
          {"division_key": "pw-2024-01-10-33", "person_id": 10005, "vote": "paired"}
        ]"#;
        let set = load_fixture(&[("votes.json", votes)]).await;

        assert_eq!(set.votes.len(), 3);
        let teller = set.votes.iter().find(|v| v.person_id == 10002).unwrap();
        assert_eq!(teller.choice, VoteChoice::No);
        assert!(teller.teller);
        let abstained = set.votes.iter().find(|v| v.person_id == 10004).unwrap();
        assert_eq!(abstained.choice, VoteChoice::Both);
        assert!(!abstained.teller);
    }

    #[tokio::test]
    async fn policies_link_divisions_and_drop_unknown_directions() {
        let policies = r#"[
          {"id": 363, "title": "Renewable Energy Expansion", "divisions": [
            {"division_key": "pw-2024-01-10-33", "direction": "Aye"},
            {"division_key": "pw-2024-02-02-40", "direction": "mystery"}
          ]}
        ]"#;
        let set = load_fixture(&[("policies.json", policies)]).await;

        assert_eq!(set.policies.len(), 1);
        assert_eq!(set.policies[0].id, "363");
        assert_eq!(set.policy_links.len(), 1);
        assert_eq!(set.policy_links[0].direction, PolicyDirection::Aye);
    }

    #[tokio::test]
    async fn divisions_parse_dates() {
        let divisions = r#"[
          {"key": "pw-2024-01-10-33", "date": "2024-01-10",
           "division_name": "Energy Bill: Third Reading"},
          {"key": "pw-bad", "date": "not a date", "division_name": "Broken"}
        ]"#;
        let set = load_fixture(&[("divisions.json", divisions)]).await;

        assert_eq!(set.divisions.len(), 1);
        assert_eq!(set.divisions[0].title, "Energy Bill: Third Reading");
    }

    #[tokio::test]
    async fn missing_files_yield_an_empty_set() {
        let set = load_fixture(&[]).await;
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn a_malformed_file_does_not_poison_the_rest() {
        let divisions = r#"[{"key": "pw-1", "date": "2024-01-10", "division_name": "D"}]"#;
        let set = load_fixture(&[("people.json", "{ not json"), ("divisions.json", divisions)])
            .await;

        assert!(set.people.is_empty());
        assert_eq!(set.divisions.len(), 1);
    }

    #[test]
    fn party_slugs_become_display_names() {
        assert_eq!(party_display("labour"), "Labour");
        assert_eq!(party_display("liberal-democrat"), "Liberal Democrat");
        assert_eq!(party_display("dup"), "DUP");
        assert_eq!(party_display("labourco-operative"), "Labour/Co-operative");
    }
}
