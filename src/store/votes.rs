//! Division results and per-person voting records.

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::types::Value;
use tokio_rusqlite::{Connection, params, params_from_iter};

use super::{StoreError, parse_stored_date};

/// How a person voted in one division. Tellers are folded into aye/no by the
/// metadata loader; this is the canonical set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Aye,
    No,
    Both,
    Absent,
}

impl VoteChoice {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aye => "aye",
            Self::No => "no",
            Self::Both => "both",
            Self::Absent => "absent",
        }
    }

    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "aye" => Some(Self::Aye),
            "no" => Some(Self::No),
            "both" => Some(Self::Both),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }
}

/// Which lobby counts as supporting the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDirection {
    Aye,
    No,
}

impl PolicyDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aye => "aye",
            Self::No => "no",
        }
    }

    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "aye" => Some(Self::Aye),
            "no" => Some(Self::No),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DivisionRecord {
    pub id: String,
    pub date: NaiveDate,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyRecord {
    pub id: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyLink {
    pub division_id: String,
    pub policy_id: String,
    pub direction: PolicyDirection,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteRecord {
    pub division_id: String,
    pub person_id: i64,
    pub choice: VoteChoice,
    pub teller: bool,
}

/// One entry in a person's chronological voting record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VoteEvent {
    pub division_id: String,
    pub date: NaiveDate,
    pub title: String,
    pub choice: VoteChoice,
    pub teller: bool,
}

/// Aggregate stance against one policy: how often the person's lobby agreed
/// with the policy direction, went against it, or did neither.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PolicyAlignment {
    pub policy_id: String,
    pub policy_title: String,
    pub aligned: usize,
    pub opposed: usize,
    pub other: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VotingRecord {
    pub events: Vec<VoteEvent>,
    pub alignments: Vec<PolicyAlignment>,
}

#[derive(Clone)]
pub struct VoteStore {
    conn: Connection,
}

impl VoteStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn upsert_divisions(&self, divisions: Vec<DivisionRecord>) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for division in &divisions {
                    tx.execute(
                        "INSERT OR REPLACE INTO divisions (id, date, title) VALUES (?, ?, ?)",
                        params![division.id, division.date.to_string(), division.title],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    pub async fn upsert_policies(
        &self,
        policies: Vec<PolicyRecord>,
        links: Vec<PolicyLink>,
    ) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for policy in &policies {
                    tx.execute(
                        "INSERT OR REPLACE INTO policies (id, title) VALUES (?, ?)",
                        params![policy.id, policy.title],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                for link in &links {
                    tx.execute(
                        "INSERT OR REPLACE INTO division_policies
                             (division_id, policy_id, direction)
                         VALUES (?, ?, ?)",
                        params![link.division_id, link.policy_id, link.direction.as_str()],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    pub async fn upsert_votes(&self, votes: Vec<VoteRecord>) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for vote in &votes {
                    tx.execute(
                        "INSERT OR REPLACE INTO votes (division_id, person_id, choice, teller)
                         VALUES (?, ?, ?, ?)",
                        params![
                            vote.division_id,
                            vote.person_id,
                            vote.choice.as_str(),
                            i64::from(vote.teller),
                        ],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    /// Chronological vote events for one person, plus per-policy alignment
    /// aggregates over the same date range. `policy` narrows both to one
    /// policy, matched by exact id or case-insensitive title fragment.
    pub async fn voting_record(
        &self,
        person_id: i64,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        policy: Option<&str>,
    ) -> Result<VotingRecord, StoreError> {
        let mut conditions = vec!["v.person_id = ?".to_string()];
        let mut values = vec![Value::Integer(person_id)];
        if let Some(from) = from {
            conditions.push("d.date >= ?".to_string());
            values.push(Value::Text(from.to_string()));
        }
        if let Some(to) = to {
            conditions.push("d.date <= ?".to_string());
            values.push(Value::Text(to.to_string()));
        }
        let base_clause = conditions.join(" AND ");

        let mut events_clause = base_clause.clone();
        let mut alignment_clause = base_clause;
        let mut events_values = values.clone();
        let mut alignment_values = values;
        if let Some(policy) = policy {
            events_clause.push_str(
                " AND EXISTS (SELECT 1 FROM division_policies dp2
                              JOIN policies p2 ON p2.id = dp2.policy_id
                              WHERE dp2.division_id = v.division_id
                                AND (p2.id = ? OR instr(lower(p2.title), ?) > 0))",
            );
            alignment_clause.push_str(" AND (p.id = ? OR instr(lower(p.title), ?) > 0)");
            for extra in [&mut events_values, &mut alignment_values] {
                extra.push(Value::Text(policy.to_string()));
                extra.push(Value::Text(policy.to_lowercase()));
            }
        }

        let events_sql = format!(
            "SELECT v.division_id, d.date, d.title, v.choice, v.teller
             FROM votes v
             JOIN divisions d ON d.id = v.division_id
             WHERE {events_clause}
             ORDER BY d.date ASC, d.id ASC"
        );
        let alignment_sql = format!(
            "SELECT dp.policy_id, p.title, dp.direction, v.choice
             FROM votes v
             JOIN divisions d ON d.id = v.division_id
             JOIN division_policies dp ON dp.division_id = v.division_id
             JOIN policies p ON p.id = dp.policy_id
             WHERE {alignment_clause}"
        );

        let record = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&events_sql)
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map(params_from_iter(events_values.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut events = Vec::new();
                for row in rows {
                    let (division_id, date, title, choice, teller) =
                        row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    events.push(VoteEvent {
                        division_id,
                        date: parse_stored_date(&date)?,
                        title,
                        choice: parse_choice(&choice)?,
                        teller: teller != 0,
                    });
                }
                drop(stmt);

                let mut stmt = conn
                    .prepare(&alignment_sql)
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map(params_from_iter(alignment_values.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut by_policy: FxHashMap<String, PolicyAlignment> = FxHashMap::default();
                for row in rows {
                    let (policy_id, title, direction, choice) =
                        row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let direction = PolicyDirection::parse(&direction).ok_or_else(|| {
                        tokio_rusqlite::Error::Other(
                            format!("unknown policy direction '{direction}'").into(),
                        )
                    })?;
                    let choice = parse_choice(&choice)?;
                    let entry =
                        by_policy
                            .entry(policy_id.clone())
                            .or_insert_with(|| PolicyAlignment {
                                policy_id,
                                policy_title: title,
                                aligned: 0,
                                opposed: 0,
                                other: 0,
                            });
                    match (choice, direction) {
                        (VoteChoice::Aye, PolicyDirection::Aye)
                        | (VoteChoice::No, PolicyDirection::No) => entry.aligned += 1,
                        (VoteChoice::Aye, PolicyDirection::No)
                        | (VoteChoice::No, PolicyDirection::Aye) => entry.opposed += 1,
                        (VoteChoice::Both | VoteChoice::Absent, _) => entry.other += 1,
                    }
                }
                let mut alignments: Vec<PolicyAlignment> = by_policy.into_values().collect();
                alignments.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));

                Ok(VotingRecord { events, alignments })
            })
            .await?;
        Ok(record)
    }
}

fn parse_choice(text: &str) -> Result<VoteChoice, tokio_rusqlite::Error> {
    VoteChoice::parse(text).ok_or_else(|| {
        tokio_rusqlite::Error::Other(format!("unknown vote choice '{text}'").into())
    })
}
