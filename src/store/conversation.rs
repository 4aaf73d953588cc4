//! Append-only conversation transcripts, one ordered stream per thread.

use chrono::Utc;
use tokio_rusqlite::{Connection, params};

use crate::message::Message;

use super::StoreError;

#[derive(Clone)]
pub struct ConversationStore {
    conn: Connection,
}

impl ConversationStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Appends one message at the next sequence position for the thread.
    pub async fn append(&self, thread_id: &str, message: &Message) -> Result<(), StoreError> {
        let thread_id = thread_id.to_string();
        let role = message.role.clone();
        let content = message.content.clone();
        let created_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO messages (thread_id, seq, role, content, created_at)
                     SELECT ?1, COALESCE(MAX(seq) + 1, 0), ?2, ?3, ?4
                     FROM messages WHERE thread_id = ?1",
                    params![thread_id, role, content, created_at],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Full transcript for a thread in append order.
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        let thread_id = thread_id.to_string();
        let messages = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT role, content FROM messages
                         WHERE thread_id = ? ORDER BY seq ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map(params![thread_id], |row| {
                        Ok(Message {
                            role: row.get(0)?,
                            content: row.get(1)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut messages = Vec::new();
                for row in rows {
                    messages.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(messages)
            })
            .await?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use tempfile::tempdir;

    #[tokio::test]
    async fn appends_keep_per_thread_order() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("conv.db"), "test-embed", 3)
            .await
            .unwrap();
        let conversations = db.conversations();

        conversations
            .append("t1", &Message::user("first question"))
            .await
            .unwrap();
        conversations
            .append("t2", &Message::user("other thread"))
            .await
            .unwrap();
        conversations
            .append("t1", &Message::assistant("first answer"))
            .await
            .unwrap();
        conversations
            .append("t1", &Message::user("followup"))
            .await
            .unwrap();

        let history = conversations.history("t1").await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first question", "first answer", "followup"]);

        let other = conversations.history("t2").await.unwrap();
        assert_eq!(other.len(), 1);
        assert!(conversations.history("t3").await.unwrap().is_empty());
    }
}
