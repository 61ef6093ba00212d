use crate::api::models::{Conversation, Message};
use crate::error::StorageError;
use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

// Caching conversations and messages to paint the inbox before the first refetch lands
#[derive(Debug, Clone)]
pub struct Cache {
    path: PathBuf,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Cache {
    pub fn default_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "zapinbox", "ZapInbox")?;
        Some(proj.data_dir().join("cache.sqlite"))
    }

    pub fn open_default() -> Result<Self, StorageError> {
        let path = Self::default_path().ok_or(StorageError::NoDataDir)?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cache = Self { path: path.to_path_buf() };
        cache.conn()?.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                last_message_at INTEGER,
                synced_at INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS messages_by_conversation
                ON messages (conversation_id, created_at);
            "#,
        )?;
        Ok(cache)
    }

    fn conn(&self) -> rusqlite::Result<Connection> {
        Connection::open(&self.path)
    }

    pub fn upsert_conversations(&self, rows: &[Conversation]) -> Result<(), StorageError> {
        let now = now_secs();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for c in rows {
            tx.execute(
                r#"
                INSERT INTO conversations (id, organization_id, last_message_at, synced_at, raw_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    organization_id=excluded.organization_id,
                    last_message_at=excluded.last_message_at,
                    synced_at=excluded.synced_at,
                    raw_json=excluded.raw_json
                "#,
                params![
                    c.id,
                    c.organization_id,
                    c.last_message_at.map(|t| t.timestamp_millis()),
                    now,
                    serde_json::to_string(c)?
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Cached conversations in inbox order: latest activity first, never-active last.
    pub fn load_conversations(&self, organization_id: &str, limit: usize) -> Result<Vec<Conversation>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT raw_json FROM conversations WHERE organization_id = ?1 \
             ORDER BY last_message_at IS NULL, last_message_at DESC, id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![organization_id, limit as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        Ok(out)
    }

    pub fn upsert_messages(&self, rows: &[Message]) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for m in rows {
            tx.execute(
                r#"
                INSERT INTO messages (id, conversation_id, created_at, raw_json)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET raw_json=excluded.raw_json
                "#,
                params![m.id, m.conversation_id, m.created_at.timestamp_millis(), serde_json::to_string(m)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Newest `limit` cached messages of a conversation, oldest first.
    pub fn load_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT raw_json FROM messages WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit as i64], |row| row.get::<_, String>(0))?;
        let mut out: Vec<Message> = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        out.reverse();
        Ok(out)
    }

    pub fn conversation_synced_at(&self, id: &str) -> Result<Option<i64>, StorageError> {
        let conn = self.conn()?;
        let ts = conn
            .query_row("SELECT synced_at FROM conversations WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(ts)
    }
}
