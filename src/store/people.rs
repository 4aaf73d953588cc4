//! People, their name aliases, and dated party memberships.

use chrono::NaiveDate;
use tokio_rusqlite::{Connection, OptionalExtension, params};

use super::StoreError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonRecord {
    pub id: i64,
    pub canonical_name: String,
}

/// One continuous seat-holding interval. `end_date` of `None` means the
/// membership is still open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipRecord {
    pub id: String,
    pub person_id: i64,
    pub party: Option<String>,
    pub constituency: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

/// A person annotated with their most recent party and constituency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonProfile {
    pub id: i64,
    pub canonical_name: String,
    pub party: Option<String>,
    pub constituency: Option<String>,
}

#[derive(Clone)]
pub struct PeopleStore {
    conn: Connection,
}

const PROFILE_SELECT: &str = "
    SELECT p.id, p.canonical_name, m.party, m.constituency
    FROM people p
    LEFT JOIN memberships m ON m.id = (
        SELECT m2.id FROM memberships m2
        WHERE m2.person_id = p.id
        ORDER BY m2.start_date DESC, m2.id DESC
        LIMIT 1
    )";

impl PeopleStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn upsert_people(&self, people: Vec<PersonRecord>) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for person in &people {
                    tx.execute(
                        "INSERT OR REPLACE INTO people (id, canonical_name) VALUES (?, ?)",
                        params![person.id, person.canonical_name],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    pub async fn upsert_aliases(&self, aliases: Vec<(i64, String)>) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (person_id, alias) in &aliases {
                    tx.execute(
                        "INSERT OR IGNORE INTO person_aliases (person_id, alias) VALUES (?, ?)",
                        params![person_id, alias],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    /// Replaces the whole membership table. Metadata loads are whole-file, so
    /// partial updates are never needed.
    pub async fn replace_memberships(
        &self,
        memberships: Vec<MembershipRecord>,
    ) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute("DELETE FROM memberships", [])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for membership in &memberships {
                    tx.execute(
                        "INSERT INTO memberships
                             (id, person_id, party, constituency, start_date, end_date)
                         VALUES (?, ?, ?, ?, ?, ?)",
                        params![
                            membership.id,
                            membership.person_id,
                            membership.party,
                            membership.constituency,
                            membership.start_date.to_string(),
                            membership.end_date.map(|date| date.to_string()),
                        ],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    /// Party held on `date`, or `None` when no membership covers it.
    pub async fn party_on(
        &self,
        person_id: i64,
        date: NaiveDate,
    ) -> Result<Option<String>, StoreError> {
        let date = date.to_string();
        let party: Option<Option<String>> = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT party FROM memberships
                     WHERE person_id = ?1 AND start_date <= ?2
                       AND (end_date IS NULL OR end_date >= ?2)
                     ORDER BY start_date DESC
                     LIMIT 1",
                    params![person_id, date],
                    |row| row.get(0),
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(party.flatten())
    }

    pub async fn profile(&self, person_id: i64) -> Result<Option<PersonProfile>, StoreError> {
        let sql = format!("{PROFILE_SELECT} WHERE p.id = ?");
        let profile = self
            .conn
            .call(move |conn| {
                conn.query_row(&sql, params![person_id], |row| {
                    Ok(PersonProfile {
                        id: row.get(0)?,
                        canonical_name: row.get(1)?,
                        party: row.get(2)?,
                        constituency: row.get(3)?,
                    })
                })
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(profile)
    }

    /// People whose canonical name or any alias equals `name`, ignoring case.
    pub async fn find_exact(&self, name: &str) -> Result<Vec<PersonProfile>, StoreError> {
        let needle = name.trim().to_lowercase();
        let sql = format!(
            "{PROFILE_SELECT}
             WHERE lower(p.canonical_name) = ?1
                OR p.id IN (SELECT a.person_id FROM person_aliases a WHERE lower(a.alias) = ?1)
             ORDER BY p.canonical_name, p.id"
        );
        self.profile_query(sql, needle).await
    }

    /// People whose canonical name or any alias contains `name`, ignoring
    /// case. `%` and `_` in the needle are treated literally.
    pub async fn find_containing(&self, name: &str) -> Result<Vec<PersonProfile>, StoreError> {
        let needle = like_pattern(name);
        let sql = format!(
            "{PROFILE_SELECT}
             WHERE lower(p.canonical_name) LIKE ?1 ESCAPE '\\'
                OR p.id IN (SELECT a.person_id FROM person_aliases a
                            WHERE lower(a.alias) LIKE ?1 ESCAPE '\\')
             ORDER BY p.canonical_name, p.id"
        );
        self.profile_query(sql, needle).await
    }

    /// All people, optionally narrowed to names containing `name_contains`,
    /// annotated with their latest party and constituency.
    pub async fn list_people(
        &self,
        name_contains: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PersonProfile>, StoreError> {
        match name_contains {
            Some(name) if !name.trim().is_empty() => {
                let needle = like_pattern(name);
                let sql = format!(
                    "{PROFILE_SELECT}
                     WHERE lower(p.canonical_name) LIKE ?1 ESCAPE '\\'
                        OR p.id IN (SELECT a.person_id FROM person_aliases a
                                    WHERE lower(a.alias) LIKE ?1 ESCAPE '\\')
                     ORDER BY p.canonical_name, p.id
                     LIMIT {limit}"
                );
                self.profile_query(sql, needle).await
            }
            _ => {
                let sql =
                    format!("{PROFILE_SELECT} ORDER BY p.canonical_name, p.id LIMIT {limit}");
                let profiles = self
                    .conn
                    .call(move |conn| {
                        let mut stmt = conn
                            .prepare(&sql)
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        let rows = stmt
                            .query_map([], |row| {
                                Ok(PersonProfile {
                                    id: row.get(0)?,
                                    canonical_name: row.get(1)?,
                                    party: row.get(2)?,
                                    constituency: row.get(3)?,
                                })
                            })
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        let mut profiles = Vec::new();
                        for row in rows {
                            profiles.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                        }
                        Ok(profiles)
                    })
                    .await?;
                Ok(profiles)
            }
        }
    }

    pub async fn aliases_of(&self, person_id: i64) -> Result<Vec<String>, StoreError> {
        let aliases = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT alias FROM person_aliases
                         WHERE person_id = ? ORDER BY alias",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map(params![person_id], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut aliases = Vec::new();
                for row in rows {
                    aliases.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(aliases)
            })
            .await?;
        Ok(aliases)
    }

    async fn profile_query(
        &self,
        sql: String,
        needle: String,
    ) -> Result<Vec<PersonProfile>, StoreError> {
        let profiles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map(params![needle], |row| {
                        Ok(PersonProfile {
                            id: row.get(0)?,
                            canonical_name: row.get(1)?,
                            party: row.get(2)?,
                            constituency: row.get(3)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut profiles = Vec::new();
                for row in rows {
                    profiles.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(profiles)
            })
            .await?;
        Ok(profiles)
    }
}

/// Lowercased `%needle%` with LIKE wildcards escaped.
fn like_pattern(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('%');
    for c in name.trim().to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
