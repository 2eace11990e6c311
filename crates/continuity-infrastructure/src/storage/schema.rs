//! Schema migrations, tracked with `PRAGMA user_version`.

use super::sqlite_ext::SqliteResultExt;
use continuity_core::Result;
use rusqlite::Connection;

/// Ordered migrations; entry `n` upgrades the schema from version `n` to `n + 1`.
const MIGRATIONS: &[&str] = &[
    // v1: initial layout
    r#"
    CREATE TABLE sessions (
        session_id   TEXT PRIMARY KEY,
        started_at   TEXT NOT NULL,
        ended_at     TEXT,
        status       TEXT NOT NULL,
        summary      TEXT,
        resumed_from TEXT REFERENCES sessions(session_id),
        process_id   INTEGER NOT NULL
    );
    CREATE INDEX idx_sessions_status ON sessions(status);
    CREATE INDEX idx_sessions_resumed_from ON sessions(resumed_from);

    CREATE TABLE messages (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id  TEXT NOT NULL UNIQUE,
        session_id  TEXT NOT NULL REFERENCES sessions(session_id),
        recorded_at TEXT NOT NULL,
        source      TEXT NOT NULL,
        content     TEXT NOT NULL
    );
    CREATE INDEX idx_messages_session ON messages(session_id, seq);

    CREATE TABLE actions (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        action_id   TEXT NOT NULL UNIQUE,
        session_id  TEXT NOT NULL REFERENCES sessions(session_id),
        action_type TEXT NOT NULL,
        status      TEXT NOT NULL,
        started_at  TEXT NOT NULL,
        ended_at    TEXT,
        params      TEXT,
        result      TEXT
    );
    CREATE INDEX idx_actions_session ON actions(session_id, seq);
    CREATE INDEX idx_actions_status ON actions(session_id, status);

    CREATE TABLE context_entries (
        session_id TEXT NOT NULL REFERENCES sessions(session_id),
        namespace  TEXT NOT NULL,
        key        TEXT NOT NULL,
        value      TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (session_id, namespace, key)
    );

    CREATE TABLE configuration (
        config_key    TEXT PRIMARY KEY,
        config_value  TEXT NOT NULL,
        config_type   TEXT NOT NULL,
        default_value TEXT NOT NULL,
        description   TEXT,
        updated_at    TEXT NOT NULL
    );
    "#,
    // v2: context change journal and saved snapshots
    r#"
    CREATE TABLE context_history (
        seq        INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(session_id),
        namespace  TEXT NOT NULL,
        key        TEXT NOT NULL,
        value      TEXT,
        changed_at TEXT NOT NULL
    );
    CREATE INDEX idx_context_history_key ON context_history(session_id, namespace, key, seq);

    CREATE TABLE context_snapshots (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id TEXT NOT NULL UNIQUE,
        session_id  TEXT NOT NULL REFERENCES sessions(session_id),
        saved_at    TEXT NOT NULL,
        context     TEXT NOT NULL
    );
    CREATE INDEX idx_context_snapshots_session ON context_snapshots(session_id, seq);
    "#,
];

/// Latest schema version this build understands.
pub fn latest_version() -> i64 {
    MIGRATIONS.len() as i64
}

/// Applies pending migrations. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .storage_context("read schema version")?;

    if current > latest_version() {
        return Err(continuity_core::ContinuityError::storage(format!(
            "database schema version {} is newer than supported version {}",
            current,
            latest_version()
        )));
    }

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = idx as i64 + 1;
        let tx = conn.transaction().storage_context("begin migration")?;
        tx.execute_batch(sql)
            .storage_context(&format!("apply migration v{}", version))?;
        tx.pragma_update(None, "user_version", version)
            .storage_context("update schema version")?;
        tx.commit().storage_context("commit migration")?;
        tracing::info!("Migrated database schema to v{}", version);
    }
    Ok(())
}
