//! SQLite implementation of [`MessageRepository`].

use crate::storage::sqlite_ext::{
    SqliteResultExt, format_timestamp, require_active_session, timestamp_column,
};
use crate::storage::Database;
use continuity_core::session::{Message, MessageRepository};
use continuity_core::{ContinuityError, Result};
use rusqlite::params;
use std::sync::Arc;

pub struct SqliteMessageRepository {
    db: Arc<Database>,
}

impl SqliteMessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl MessageRepository for SqliteMessageRepository {
    fn append(&self, message: &Message, max_per_session: Option<u64>) -> Result<()> {
        self.db.with_transaction(|tx| {
            require_active_session(tx, &message.session_id)?;

            if let Some(max) = max_per_session {
                let count: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                        [&message.session_id],
                        |row| row.get(0),
                    )
                    .storage_context("count messages")?;
                if count as u64 >= max {
                    return Err(ContinuityError::state(format!(
                        "session '{}' reached the limit of {} messages",
                        message.session_id, max
                    )));
                }
            }

            tx.execute(
                "INSERT INTO messages (message_id, session_id, recorded_at, source, content) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    message.session_id,
                    format_timestamp(&message.recorded_at),
                    message.source,
                    message.content,
                ],
            )
            .storage_context("insert message")?;
            Ok(())
        })
    }

    fn list(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.db.query(
            "SELECT message_id, session_id, recorded_at, source, content FROM messages \
             WHERE session_id = ?1 ORDER BY seq LIMIT ?2",
            params![session_id, limit as i64],
            |row| {
                Ok(Message {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    recorded_at: timestamp_column(row, 2)?,
                    source: row.get(3)?,
                    content: row.get(4)?,
                })
            },
        )
    }

    fn count(&self, session_id: &str) -> Result<u64> {
        self.db.with_connection(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                    [session_id],
                    |row| row.get(0),
                )
                .storage_context("count messages")?;
            Ok(count as u64)
        })
    }
}
