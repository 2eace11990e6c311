//! SQLite implementation of [`ActionRepository`].

use crate::storage::sqlite_ext::{
    SqliteResultExt, encode_json, format_timestamp, json_column, optional_json_column,
    optional_timestamp_column, parsed_column, query_all, require_active_session,
    timestamp_column,
};
use crate::storage::Database;
use chrono::{DateTime, Utc};
use continuity_core::action::{
    Action, ActionFilter, ActionRepository, ActionStats, ActionStatus,
};
use continuity_core::{ContinuityError, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::sync::Arc;

const ACTION_COLUMNS: &str =
    "action_id, session_id, action_type, status, started_at, ended_at, params, result";

fn map_action(row: &Row<'_>) -> rusqlite::Result<Action> {
    Ok(Action {
        id: row.get(0)?,
        session_id: row.get(1)?,
        action_type: row.get(2)?,
        status: parsed_column(row, 3)?,
        started_at: timestamp_column(row, 4)?,
        ended_at: optional_timestamp_column(row, 5)?,
        params: json_column(row, 6)?,
        result: optional_json_column(row, 7)?,
    })
}

fn find_action(conn: &Connection, action_id: &str) -> Result<Option<Action>> {
    conn.query_row(
        &format!("SELECT {} FROM actions WHERE action_id = ?1", ACTION_COLUMNS),
        [action_id],
        map_action,
    )
    .optional()
    .storage_context("find action")
}

pub struct SqliteActionRepository {
    db: Arc<Database>,
}

impl SqliteActionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl ActionRepository for SqliteActionRepository {
    fn insert_pending(&self, action: &Action, max_per_session: Option<u64>) -> Result<()> {
        if action.status != ActionStatus::Pending {
            return Err(ContinuityError::state(format!(
                "new action '{}' must be PENDING, not {}",
                action.id, action.status
            )));
        }
        let params_json = encode_json(Some(&action.params))?;

        self.db.with_transaction(|tx| {
            require_active_session(tx, &action.session_id)?;

            if let Some(max) = max_per_session {
                let count: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM actions WHERE session_id = ?1",
                        [&action.session_id],
                        |row| row.get(0),
                    )
                    .storage_context("count actions")?;
                if count as u64 >= max {
                    return Err(ContinuityError::state(format!(
                        "session '{}' reached the limit of {} actions",
                        action.session_id, max
                    )));
                }
            }

            tx.execute(
                "INSERT INTO actions \
                 (action_id, session_id, action_type, status, started_at, params) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    action.id,
                    action.session_id,
                    action.action_type,
                    action.status.as_str(),
                    format_timestamp(&action.started_at),
                    params_json,
                ],
            )
            .storage_context("insert action")?;
            Ok(())
        })
    }

    fn transition(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: Option<&Value>,
        ended_at: DateTime<Utc>,
    ) -> Result<Action> {
        if !ActionStatus::Pending.can_transition_to(status) {
            return Err(ContinuityError::state(format!(
                "cannot move an action to {}",
                status
            )));
        }
        let result_json = encode_json(result)?;

        self.db.with_transaction(|tx| {
            let updated = tx
                .execute(
                    "UPDATE actions SET status = ?2, result = ?3, ended_at = ?4 \
                     WHERE action_id = ?1 AND status = ?5",
                    params![
                        action_id,
                        status.as_str(),
                        result_json,
                        format_timestamp(&ended_at),
                        ActionStatus::Pending.as_str(),
                    ],
                )
                .storage_context("update action status")?;

            let action = find_action(tx, action_id)?
                .ok_or_else(|| ContinuityError::not_found("action", action_id))?;
            if updated == 0 {
                return Err(ContinuityError::state(format!(
                    "action '{}' is already {}",
                    action_id, action.status
                )));
            }
            Ok(action)
        })
    }

    fn find_by_id(&self, action_id: &str) -> Result<Option<Action>> {
        self.db.with_connection(|conn| find_action(conn, action_id))
    }

    fn list(&self, session_id: &str, filter: &ActionFilter) -> Result<Vec<Action>> {
        let mut sql = format!("SELECT {} FROM actions WHERE session_id = ?1", ACTION_COLUMNS);
        let mut values: Vec<String> = vec![session_id.to_string()];

        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        if let Some(action_type) = &filter.action_type {
            values.push(action_type.clone());
            sql.push_str(&format!(" AND action_type = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY seq DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        self.db.query(&sql, params_from_iter(values.iter()), map_action)
    }

    fn stats(&self, session_id: &str) -> Result<ActionStats> {
        let rows = self.db.with_connection(|conn| {
            query_all(
                conn,
                "SELECT status, action_type, COUNT(*) FROM actions \
                 WHERE session_id = ?1 GROUP BY status, action_type",
                [session_id],
                |row| {
                    Ok((
                        parsed_column::<ActionStatus>(row, 0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .storage_context("aggregate actions")
        })?;

        let mut stats = ActionStats::default();
        for (status, action_type, count) in rows {
            let count = count as u64;
            stats.total += count;
            *stats.by_status.entry(status).or_insert(0) += count;
            *stats.by_type.entry(action_type).or_insert(0) += count;
        }
        Ok(stats)
    }
}
