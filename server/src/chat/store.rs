//! Message history persistence.
//!
//! The dispatcher only needs to append; the history endpoints read back the
//! last N messages of a room or a private pair, oldest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::message::ChatMessage;
use super::UserId;
use crate::db::{self, DbPool};
use crate::error::ChatError;

/// A message as read back from history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub from: UserId,
    pub to: UserId,
    pub room_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Latest private message exchanged with one partner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub user_id: UserId,
    pub last_message: String,
    pub last_from: UserId,
    pub last_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Save a routed message, returning its row id.
    async fn append(&self, message: &ChatMessage) -> Result<i64, ChatError>;

    /// Last `limit` messages broadcast to `room_id`, oldest first.
    async fn room_history(&self, room_id: &str, limit: usize)
        -> Result<Vec<StoredMessage>, ChatError>;

    /// Last `limit` private messages between `a` and `b`, oldest first.
    async fn private_history(
        &self,
        a: UserId,
        b: UserId,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, ChatError>;

    /// One entry per private partner of `user_id`, most recent first.
    async fn conversations(&self, user_id: UserId) -> Result<Vec<Conversation>, ChatError>;
}

/// SQLite-backed store sharing the server's connection.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn open_in_memory() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self::new(db::open_in_memory()?))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, ChatError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| ChatError::StoreLock)?;
            f(&conn)
        })
        .await?
    }
}

fn read_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        from: row.get::<_, i64>(1)? as UserId,
        to: row.get::<_, i64>(2)? as UserId,
        room_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, message: &ChatMessage) -> Result<i64, ChatError> {
        let msg = message.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_messages (from_user_id, to_user_id, room_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    msg.from_id as i64,
                    msg.to_id as i64,
                    msg.room_id,
                    msg.content,
                    msg.created_at
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn room_history(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, from_user_id, to_user_id, room_id, content, created_at
                 FROM chat_messages
                 WHERE room_id = ?1 AND to_user_id = 0
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;
            let mut messages = stmt
                .query_map(rusqlite::params![room_id, limit as i64], read_message)?
                .collect::<Result<Vec<_>, _>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await
    }

    async fn private_history(
        &self,
        a: UserId,
        b: UserId,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, from_user_id, to_user_id, room_id, content, created_at
                 FROM chat_messages
                 WHERE (from_user_id = ?1 AND to_user_id = ?2)
                    OR (from_user_id = ?2 AND to_user_id = ?1)
                 ORDER BY id DESC
                 LIMIT ?3",
            )?;
            let mut messages = stmt
                .query_map(
                    rusqlite::params![a as i64, b as i64, limit as i64],
                    read_message,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await
    }

    async fn conversations(&self, user_id: UserId) -> Result<Vec<Conversation>, ChatError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.partner, m.content, m.from_user_id, m.created_at
                 FROM (
                     SELECT CASE WHEN from_user_id = ?1 THEN to_user_id ELSE from_user_id END
                                AS partner,
                            MAX(id) AS last_id
                     FROM chat_messages
                     WHERE to_user_id != 0 AND (from_user_id = ?1 OR to_user_id = ?1)
                     GROUP BY partner
                 ) c
                 JOIN chat_messages m ON m.id = c.last_id
                 ORDER BY m.id DESC",
            )?;
            let conversations = stmt
                .query_map(rusqlite::params![user_id as i64], |row| {
                    Ok(Conversation {
                        user_id: row.get::<_, i64>(0)? as UserId,
                        last_message: row.get(1)?,
                        last_from: row.get::<_, i64>(2)? as UserId,
                        last_at: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conversations)
        })
        .await
    }
}
