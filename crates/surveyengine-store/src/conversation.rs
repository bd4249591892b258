use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use surveyengine_core::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub template_id: String,
    pub timestamp: String,
    pub created_at: String,
    pub message_count: u32,
}

/// Tracks one row per conversation thread: which template drove it, when it
/// started, and how many messages it has accumulated so far.
pub struct ConversationStore {
    db: Mutex<Connection>,
}

impl ConversationStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                template_id     TEXT NOT NULL,
                timestamp       TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                message_count   INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_template
                ON conversations(template_id, created_at DESC);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Create the row on first contact, or bump `message_count` and
    /// `timestamp` on every subsequent turn.
    pub fn upsert(&self, conversation_id: &str, template_id: &str, message_count: u32) -> Result<ConversationRecord> {
        let now = chrono::Utc::now();
        let timestamp = now.format("%Y%m%d%H%M%S").to_string();
        let created_at = now.to_rfc3339();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (conversation_id, template_id, timestamp, created_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(conversation_id) DO UPDATE SET
                timestamp = excluded.timestamp,
                message_count = excluded.message_count",
            params![conversation_id, template_id, timestamp, created_at, message_count],
        )?;

        db.query_row(
            "SELECT conversation_id, template_id, timestamp, created_at, message_count
             FROM conversations WHERE conversation_id = ?1",
            params![conversation_id],
            row_to_record,
        )
        .map_err(Into::into)
    }

    pub fn get(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT conversation_id, template_id, timestamp, created_at, message_count
             FROM conversations WHERE conversation_id = ?1",
            params![conversation_id],
            row_to_record,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Most recently started conversations, optionally filtered to one
    /// template, newest first.
    pub fn list(&self, template_id: Option<&str>, limit: usize, offset: usize) -> Result<Vec<ConversationRecord>> {
        let db = self.db.lock().unwrap();
        match template_id {
            Some(tid) => {
                let mut stmt = db.prepare(
                    "SELECT conversation_id, template_id, timestamp, created_at, message_count
                     FROM conversations WHERE template_id = ?1
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(params![tid, limit as i64, offset as i64], row_to_record)?;
                Ok(rows.filter_map(|r| r.ok()).collect())
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT conversation_id, template_id, timestamp, created_at, message_count
                     FROM conversations
                     ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_record)?;
                Ok(rows.filter_map(|r| r.ok()).collect())
            }
        }
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        conversation_id: row.get(0)?,
        template_id: row.get(1)?,
        timestamp: row.get(2)?,
        created_at: row.get(3)?,
        message_count: row.get::<_, i64>(4)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn upsert_creates_then_updates_the_same_row() {
        let store = store();
        let first = store.upsert("conv-1", "tmpl-a", 2).unwrap();
        assert_eq!(first.message_count, 2);

        let second = store.upsert("conv-1", "tmpl-a", 5).unwrap();
        assert_eq!(second.message_count, 5);
        assert_eq!(store.list(None, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn list_filters_by_template_and_orders_newest_first() {
        let store = store();
        store.upsert("conv-1", "tmpl-a", 1).unwrap();
        store.upsert("conv-2", "tmpl-b", 1).unwrap();
        let only_a = store.list(Some("tmpl-a"), 10, 0).unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].conversation_id, "conv-1");
    }

    #[test]
    fn get_returns_none_for_unknown_id() {
        let store = store();
        assert!(store.get("nope").unwrap().is_none());
    }
}
