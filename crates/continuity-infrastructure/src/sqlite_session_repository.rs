//! SQLite implementation of [`SessionRepository`].

use crate::storage::sqlite_ext::{
    SqliteResultExt, format_timestamp, optional_timestamp_column, parsed_column, query_all,
    timestamp_column,
};
use crate::storage::Database;
use chrono::{DateTime, Utc};
use continuity_core::action::{ActionId, ActionStatus};
use continuity_core::session::{Session, SessionRepository, SessionStatus};
use continuity_core::{ContinuityError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

const SESSION_COLUMNS: &str =
    "session_id, started_at, ended_at, status, summary, resumed_from, process_id";

fn map_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        started_at: timestamp_column(row, 1)?,
        ended_at: optional_timestamp_column(row, 2)?,
        status: parsed_column(row, 3)?,
        summary: row.get(4)?,
        resumed_from: row.get(5)?,
        process_id: row.get(6)?,
    })
}

fn find_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    conn.query_row(
        &format!("SELECT {} FROM sessions WHERE session_id = ?1", SESSION_COLUMNS),
        [session_id],
        map_session,
    )
    .optional()
    .storage_context("find session")
}

fn insert_session(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions \
         (session_id, started_at, ended_at, status, summary, resumed_from, process_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            session.id,
            format_timestamp(&session.started_at),
            session.ended_at.as_ref().map(format_timestamp),
            session.status.as_str(),
            session.summary,
            session.resumed_from,
            session.process_id,
        ],
    )
    .storage_context("insert session")?;
    Ok(())
}

/// Session rows stored in the shared [`Database`].
pub struct SqliteSessionRepository {
    db: Arc<Database>,
}

impl SqliteSessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SessionRepository for SqliteSessionRepository {
    fn insert(&self, session: &Session) -> Result<()> {
        self.db.with_transaction(|tx| insert_session(tx, session))
    }

    fn insert_resumed(&self, session: &Session) -> Result<usize> {
        let from = session
            .resumed_from
            .as_deref()
            .ok_or_else(|| ContinuityError::state("resumed session has no source session"))?;

        self.db.with_transaction(|tx| {
            match find_session(tx, from)? {
                Some(source) if source.status == SessionStatus::Crashed => {}
                _ => return Err(ContinuityError::not_found("crashed session", from)),
            }

            insert_session(tx, session)?;

            let copied = tx
                .execute(
                    "INSERT INTO context_entries (session_id, namespace, key, value, updated_at) \
                     SELECT ?1, namespace, key, value, updated_at \
                     FROM context_entries WHERE session_id = ?2",
                    params![session.id, from],
                )
                .storage_context("copy context entries")?;
            tx.execute(
                "INSERT INTO context_history (session_id, namespace, key, value, changed_at) \
                 SELECT ?1, namespace, key, value, ?2 \
                 FROM context_entries WHERE session_id = ?1 ORDER BY namespace, key",
                params![session.id, format_timestamp(&session.started_at)],
            )
            .storage_context("journal copied context")?;
            Ok(copied)
        })
    }

    fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        self.db.with_connection(|conn| find_session(conn, session_id))
    }

    fn finish(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        summary: Option<&str>,
    ) -> Result<Session> {
        self.db.with_transaction(|tx| {
            let updated = tx
                .execute(
                    "UPDATE sessions SET status = ?2, ended_at = ?3, summary = ?4 \
                     WHERE session_id = ?1 AND status = ?5",
                    params![
                        session_id,
                        SessionStatus::Completed.as_str(),
                        format_timestamp(&ended_at),
                        summary,
                        SessionStatus::Active.as_str(),
                    ],
                )
                .storage_context("finish session")?;

            let session = find_session(tx, session_id)?
                .ok_or_else(|| ContinuityError::not_found("session", session_id))?;
            if updated == 0 {
                return Err(ContinuityError::state(format!(
                    "session '{}' is {}, not ACTIVE",
                    session_id, session.status
                )));
            }
            Ok(session)
        })
    }

    fn mark_crashed(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<Vec<ActionId>> {
        self.db.with_transaction(|tx| {
            let updated = tx
                .execute(
                    "UPDATE sessions SET status = ?2, ended_at = ?3 \
                     WHERE session_id = ?1 AND status = ?4",
                    params![
                        session_id,
                        SessionStatus::Crashed.as_str(),
                        format_timestamp(&ended_at),
                        SessionStatus::Active.as_str(),
                    ],
                )
                .storage_context("mark session crashed")?;
            if updated == 0 {
                return Ok(Vec::new());
            }

            let interrupted: Vec<ActionId> = query_all(
                tx,
                "SELECT action_id FROM actions WHERE session_id = ?1 AND status = ?2 ORDER BY seq",
                params![session_id, ActionStatus::Pending.as_str()],
                |row| row.get(0),
            )
            .storage_context("list pending actions")?;

            tx.execute(
                "UPDATE actions SET status = ?2, ended_at = ?3 \
                 WHERE session_id = ?1 AND status = ?4",
                params![
                    session_id,
                    ActionStatus::Interrupted.as_str(),
                    format_timestamp(&ended_at),
                    ActionStatus::Pending.as_str(),
                ],
            )
            .storage_context("interrupt pending actions")?;

            Ok(interrupted)
        })
    }

    fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        self.db.query(
            &format!(
                "SELECT {} FROM sessions WHERE status = ?1 \
                 ORDER BY started_at DESC, session_id DESC",
                SESSION_COLUMNS
            ),
            [status.as_str()],
            map_session,
        )
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<Session>> {
        self.db.query(
            &format!(
                "SELECT {} FROM sessions ORDER BY started_at DESC, session_id DESC LIMIT ?1",
                SESSION_COLUMNS
            ),
            [limit as i64],
            map_session,
        )
    }

    fn list_resumed_from(&self, session_id: &str) -> Result<Vec<Session>> {
        self.db.query(
            &format!(
                "SELECT {} FROM sessions WHERE resumed_from = ?1 ORDER BY started_at, session_id",
                SESSION_COLUMNS
            ),
            [session_id],
            map_session,
        )
    }
}
