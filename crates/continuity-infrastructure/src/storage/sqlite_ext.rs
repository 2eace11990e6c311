//! Conversions between SQLite values and domain types.

use chrono::{DateTime, SecondsFormat, Utc};
use continuity_core::session::SessionStatus;
use continuity_core::{ContinuityError, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Params, Row};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::str::FromStr;

/// Maps `rusqlite` errors into [`ContinuityError::Storage`] with context.
pub trait SqliteResultExt<T> {
    fn storage_context(self, what: &str) -> Result<T>;
}

impl<T> SqliteResultExt<T> for rusqlite::Result<T> {
    fn storage_context(self, what: &str) -> Result<T> {
        self.map_err(|err| ContinuityError::storage(format!("{}: {}", what, err)))
    }
}

/// Formats a timestamp as RFC 3339 UTC with microsecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[derive(Debug)]
struct ParseError(String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

pub fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

/// Reads a JSON text column; SQL NULL becomes `Value::Null`.
pub fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e)),
        None => Ok(Value::Null),
    }
}

pub fn optional_json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

/// Reads a JSON text column into a typed value.
pub fn decoded_json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// Reads a text column through `FromStr`, e.g. a status enum.
pub fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, ParseError(e)))
}

/// Encodes an optional JSON payload.
///
/// Only an absent payload becomes SQL NULL; `Value::Null` is stored as the
/// text `null` so it reads back as `Some(Value::Null)`.
pub fn encode_json(value: Option<&Value>) -> Result<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

/// Runs a query and collects every mapped row.
pub fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> rusqlite::Result<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?;
    let collected = rows.collect::<rusqlite::Result<Vec<T>>>();
    collected
}

/// Fails with `State` unless `session_id` names an active session.
pub fn require_active_session(conn: &Connection, session_id: &str) -> Result<()> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM sessions WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )
        .optional()
        .storage_context("look up session status")?;

    match status.as_deref() {
        Some(s) if s == SessionStatus::Active.as_str() => Ok(()),
        Some(s) => Err(ContinuityError::state(format!(
            "session '{}' is {}, not ACTIVE",
            session_id, s
        ))),
        None => Err(ContinuityError::state(format!(
            "no active session '{}'",
            session_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_is_microsecond_utc() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-05-01T12:30:00.000000Z");
    }

    #[test]
    fn test_storage_context_wraps_sqlite_errors() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .execute("INSERT INTO missing VALUES (1)", [])
            .storage_context("insert")
            .unwrap_err();
        assert!(err.is_storage());
        assert!(err.to_string().contains("insert"));
    }

    #[test]
    fn test_encode_json_keeps_null_distinct_from_absent() {
        assert_eq!(encode_json(None).unwrap(), None);
        assert_eq!(encode_json(Some(&Value::Null)).unwrap().as_deref(), Some("null"));
        assert_eq!(
            encode_json(Some(&serde_json::json!({"a": 1}))).unwrap().as_deref(),
            Some("{\"a\":1}")
        );
    }
}
