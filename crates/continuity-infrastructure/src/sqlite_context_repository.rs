//! SQLite implementation of [`ContextRepository`].

use crate::storage::sqlite_ext::{
    SqliteResultExt, decoded_json_column, format_timestamp, json_column, optional_json_column,
    query_all, require_active_session, timestamp_column,
};
use crate::storage::Database;
use continuity_core::clock;
use continuity_core::context::{ContextChange, ContextEntry, ContextRepository, SavedSnapshot};
use continuity_core::{ContinuityError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::sync::Arc;

const ENTRY_COLUMNS: &str = "session_id, namespace, key, value, updated_at";
const SNAPSHOT_COLUMNS: &str = "snapshot_id, session_id, saved_at, context";

fn map_entry(row: &Row<'_>) -> rusqlite::Result<ContextEntry> {
    Ok(ContextEntry {
        session_id: row.get(0)?,
        namespace: row.get(1)?,
        key: row.get(2)?,
        value: json_column(row, 3)?,
        updated_at: timestamp_column(row, 4)?,
    })
}

fn map_change(row: &Row<'_>) -> rusqlite::Result<ContextChange> {
    Ok(ContextChange {
        session_id: row.get(0)?,
        namespace: row.get(1)?,
        key: row.get(2)?,
        value: optional_json_column(row, 3)?,
        changed_at: timestamp_column(row, 4)?,
    })
}

fn map_snapshot(row: &Row<'_>) -> rusqlite::Result<SavedSnapshot> {
    Ok(SavedSnapshot {
        id: row.get(0)?,
        session_id: row.get(1)?,
        saved_at: timestamp_column(row, 2)?,
        context: decoded_json_column(row, 3)?,
    })
}

/// Journals the deletion of every entry matched by `filter` before it is removed.
fn journal_deletions(conn: &Connection, filter: &str, params: &[&dyn ToSql]) -> Result<()> {
    let now = format_timestamp(&clock::now());
    let mut bound: Vec<&dyn ToSql> = params.to_vec();
    bound.push(&now);
    conn.execute(
        &format!(
            "INSERT INTO context_history (session_id, namespace, key, value, changed_at) \
             SELECT session_id, namespace, key, NULL, ?{} \
             FROM context_entries WHERE {} ORDER BY namespace, key",
            bound.len(),
            filter
        ),
        bound.as_slice(),
    )
    .storage_context("journal context deletion")?;
    Ok(())
}

fn upsert_entry(conn: &Connection, entry: &ContextEntry) -> Result<()> {
    let value = serde_json::to_string(&entry.value)?;
    conn.execute(
        "INSERT INTO context_entries (session_id, namespace, key, value, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(session_id, namespace, key) \
         DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![
            entry.session_id,
            entry.namespace,
            entry.key,
            value,
            format_timestamp(&entry.updated_at),
        ],
    )
    .storage_context("upsert context entry")?;
    conn.execute(
        "INSERT INTO context_history (session_id, namespace, key, value, changed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.session_id,
            entry.namespace,
            entry.key,
            value,
            format_timestamp(&entry.updated_at),
        ],
    )
    .storage_context("journal context entry")?;
    Ok(())
}

fn check_owner(session_id: &str, entries: &[ContextEntry]) -> Result<()> {
    match entries.iter().find(|e| e.session_id != session_id) {
        Some(stray) => Err(ContinuityError::state(format!(
            "entry '{}/{}' belongs to session '{}', not '{}'",
            stray.namespace, stray.key, stray.session_id, session_id
        ))),
        None => Ok(()),
    }
}

pub struct SqliteContextRepository {
    db: Arc<Database>,
}

impl SqliteContextRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl ContextRepository for SqliteContextRepository {
    fn upsert(&self, entry: &ContextEntry) -> Result<()> {
        self.db.with_transaction(|tx| {
            require_active_session(tx, &entry.session_id)?;
            upsert_entry(tx, entry)
        })
    }

    fn upsert_many(&self, session_id: &str, entries: &[ContextEntry]) -> Result<()> {
        check_owner(session_id, entries)?;
        self.db.with_transaction(|tx| {
            require_active_session(tx, session_id)?;
            for entry in entries {
                upsert_entry(tx, entry)?;
            }
            Ok(())
        })
    }

    fn replace_all(&self, session_id: &str, entries: &[ContextEntry]) -> Result<()> {
        check_owner(session_id, entries)?;
        self.db.with_transaction(|tx| {
            require_active_session(tx, session_id)?;
            journal_deletions(tx, "session_id = ?1", params![session_id])?;
            tx.execute(
                "DELETE FROM context_entries WHERE session_id = ?1",
                [session_id],
            )
            .storage_context("clear session context")?;
            for entry in entries {
                upsert_entry(tx, entry)?;
            }
            Ok(())
        })
    }

    fn find(&self, session_id: &str, namespace: &str, key: &str) -> Result<Option<ContextEntry>> {
        self.db.with_connection(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM context_entries \
                     WHERE session_id = ?1 AND namespace = ?2 AND key = ?3",
                    ENTRY_COLUMNS
                ),
                params![session_id, namespace, key],
                map_entry,
            )
            .optional()
            .storage_context("find context entry")
        })
    }

    fn list_namespace(&self, session_id: &str, namespace: &str) -> Result<Vec<ContextEntry>> {
        self.db.with_connection(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM context_entries \
                     WHERE session_id = ?1 AND namespace = ?2 ORDER BY key",
                    ENTRY_COLUMNS
                ),
                params![session_id, namespace],
                map_entry,
            )
            .storage_context("list context namespace")
        })
    }

    fn list_session(&self, session_id: &str) -> Result<Vec<ContextEntry>> {
        self.db.query(
            &format!(
                "SELECT {} FROM context_entries WHERE session_id = ?1 ORDER BY namespace, key",
                ENTRY_COLUMNS
            ),
            [session_id],
            map_entry,
        )
    }

    fn delete(&self, session_id: &str, namespace: &str, key: &str) -> Result<bool> {
        self.db.with_transaction(|tx| {
            require_active_session(tx, session_id)?;
            journal_deletions(
                tx,
                "session_id = ?1 AND namespace = ?2 AND key = ?3",
                params![session_id, namespace, key],
            )?;
            let removed = tx
                .execute(
                    "DELETE FROM context_entries \
                     WHERE session_id = ?1 AND namespace = ?2 AND key = ?3",
                    params![session_id, namespace, key],
                )
                .storage_context("delete context entry")?;
            Ok(removed > 0)
        })
    }

    fn delete_namespace(&self, session_id: &str, namespace: &str) -> Result<usize> {
        self.db.with_transaction(|tx| {
            require_active_session(tx, session_id)?;
            journal_deletions(
                tx,
                "session_id = ?1 AND namespace = ?2",
                params![session_id, namespace],
            )?;
            tx.execute(
                "DELETE FROM context_entries WHERE session_id = ?1 AND namespace = ?2",
                params![session_id, namespace],
            )
            .storage_context("delete context namespace")
        })
    }

    fn history(
        &self,
        session_id: &str,
        namespace: &str,
        key: &str,
        limit: usize,
    ) -> Result<Vec<ContextChange>> {
        self.db.query(
            "SELECT session_id, namespace, key, value, changed_at FROM context_history \
             WHERE session_id = ?1 AND namespace = ?2 AND key = ?3 \
             ORDER BY seq DESC LIMIT ?4",
            params![session_id, namespace, key, limit as i64],
            map_change,
        )
    }

    fn save_snapshot(&self, snapshot: &SavedSnapshot) -> Result<()> {
        let context = serde_json::to_string(&snapshot.context)?;
        self.db.with_transaction(|tx| {
            require_active_session(tx, &snapshot.session_id)?;
            tx.execute(
                "INSERT INTO context_snapshots (snapshot_id, session_id, saved_at, context) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    snapshot.id,
                    snapshot.session_id,
                    format_timestamp(&snapshot.saved_at),
                    context,
                ],
            )
            .storage_context("insert context snapshot")?;
            Ok(())
        })
    }

    fn list_snapshots(&self, session_id: &str, limit: usize) -> Result<Vec<SavedSnapshot>> {
        self.db.query(
            &format!(
                "SELECT {} FROM context_snapshots WHERE session_id = ?1 \
                 ORDER BY seq DESC LIMIT ?2",
                SNAPSHOT_COLUMNS
            ),
            params![session_id, limit as i64],
            map_snapshot,
        )
    }

    fn find_snapshot(&self, snapshot_id: &str) -> Result<Option<SavedSnapshot>> {
        self.db.with_connection(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM context_snapshots WHERE snapshot_id = ?1",
                    SNAPSHOT_COLUMNS
                ),
                [snapshot_id],
                map_snapshot,
            )
            .optional()
            .storage_context("find context snapshot")
        })
    }
}
