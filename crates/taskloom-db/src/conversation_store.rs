use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use taskloom_common::{Error, Result};
use tracing::info;

use crate::migrations::CONVERSATIONS_SCHEMA_V1;

/// One stored chat turn, ordered by insertion within its conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Durable chat history as seen by the orchestration core.
///
/// The caller is responsible for tenant scoping of conversation ids; the core
/// only reads a bounded recent window and appends new turns.
pub trait ConversationStore: Send + Sync {
    fn append_turn(&self, conversation_id: &str, role: &str, content: &str) -> Result<()>;
    fn load_recent_turns(&self, conversation_id: &str, count: usize)
    -> Result<Vec<ConversationTurn>>;
}

/// SQLite-backed conversation store.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening conversation store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open conversation database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(CONVERSATIONS_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("conversation migration failed: {e}")))?;
        Ok(())
    }
}

impl ConversationStore for SqliteConversationStore {
    fn append_turn(&self, conversation_id: &str, role: &str, content: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO conversation_turns (conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, role, content, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to append turn: {e}")))?;
        Ok(())
    }

    fn load_recent_turns(
        &self,
        conversation_id: &str,
        count: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT role, content, created_at FROM conversation_turns
                 WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare turn query: {e}")))?;

        let rows = stmt
            .query_map(params![conversation_id, count as i64], |row| {
                let created_at: String = row.get(2)?;
                Ok(ConversationTurn {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query turns: {e}")))?;

        let mut turns = Vec::new();
        for row in rows {
            turns.push(row.map_err(|e| Error::Database(format!("failed to read turn: {e}")))?);
        }
        // Query returned newest-first; callers expect chronological order.
        turns.reverse();
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_turns_come_back_in_order() {
        let store = SqliteConversationStore::in_memory().unwrap();
        store.append_turn("c1", "user", "add milk to my list").unwrap();
        store.append_turn("c1", "assistant", "Added.").unwrap();
        store.append_turn("c1", "user", "thanks").unwrap();

        let turns = store.load_recent_turns("c1", 10).unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].content, "Added.");
        assert_eq!(turns[2].content, "thanks");
    }

    #[test]
    fn recent_window_keeps_the_newest_turns() {
        let store = SqliteConversationStore::in_memory().unwrap();
        for i in 0..5 {
            store.append_turn("c1", "user", &format!("message {i}")).unwrap();
        }

        let turns = store.load_recent_turns("c1", 2).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "message 3");
        assert_eq!(turns[1].content, "message 4");
    }

    #[test]
    fn conversations_are_independent() {
        let store = SqliteConversationStore::in_memory().unwrap();
        store.append_turn("c1", "user", "one").unwrap();
        store.append_turn("c2", "user", "two").unwrap();

        let turns = store.load_recent_turns("c2", 10).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "two");
    }
}
