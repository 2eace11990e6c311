//! The SQLite-backed persistent store.

use super::schema;
use super::sqlite_ext::{query_all, SqliteResultExt};
use continuity_core::{ContinuityError, Result};
use rusqlite::{Connection, DatabaseName, Params, Row, Transaction, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable storage for every continuity row.
///
/// A single connection guarded by a mutex serialises access across threads.
/// Multi-statement writes go through [`Database::with_transaction`], which
/// either commits every write or none of them.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database file and brings its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)
            .storage_context(&format!("open database {}", path.display()))?;
        Self::configure(&conn, true)?;
        schema::migrate(&mut conn)?;

        tracing::info!("Opened continuity database at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().storage_context("open in-memory database")?;
        Self::configure(&conn, false)?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn configure(conn: &Connection, on_disk: bool) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", true)
            .storage_context("enable foreign keys")?;
        if on_disk {
            // journal_mode returns the resulting mode as a row
            let _mode: String = conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
                .storage_context("enable WAL")?;
            // committed writes must survive power loss, not only a process crash
            conn.pragma_update(None, "synchronous", "FULL")
                .storage_context("set synchronous")?;
        }
        conn.busy_timeout(BUSY_TIMEOUT)
            .storage_context("set busy timeout")?;
        Ok(())
    }

    /// Location of the database file; `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ContinuityError::storage("database connection mutex poisoned"))
    }

    /// Executes a single statement and returns the number of affected rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(sql, params).storage_context("execute statement")
    }

    /// Runs a query and maps every row.
    pub fn query<T, P, F>(&self, sql: &str, params: P, mapper: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.lock()?;
        query_all(&conn, sql, params, mapper).storage_context("run query")
    }

    /// Runs read-only work against the connection under the lock.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside an IMMEDIATE transaction.
    ///
    /// Commits when `f` returns `Ok`; rolls back every write made by `f` when
    /// it returns `Err` or when the commit itself fails.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage_context("begin transaction")?;

        match f(&tx) {
            Ok(value) => {
                tx.commit().storage_context("commit transaction")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::error!("Rollback failed after '{}': {}", err, rollback_err);
                } else {
                    tracing::debug!("Transaction rolled back: {}", err);
                }
                Err(err)
            }
        }
    }

    /// Writes a point-in-time copy of the database to `dest`.
    ///
    /// On-disk databases are copied through a separate source connection so
    /// the main connection is only blocked by SQLite's own page locks.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        match &self.path {
            Some(path) => {
                let source = Connection::open(path).storage_context("open backup source")?;
                source
                    .busy_timeout(BUSY_TIMEOUT)
                    .storage_context("set busy timeout")?;
                source
                    .backup(DatabaseName::Main, dest, None)
                    .storage_context("backup database")?;
            }
            None => {
                let conn = self.lock()?;
                conn.backup(DatabaseName::Main, dest, None)
                    .storage_context("backup database")?;
            }
        }

        tracing::info!("Backed up database to {:?}", dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;

    fn count_sessions(db: &Database) -> i64 {
        db.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
                .storage_context("count")
        })
        .unwrap()
    }

    fn insert_session(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO sessions (session_id, started_at, status, process_id) \
             VALUES (?1, '2024-01-01T00:00:00.000000Z', 'ACTIVE', 1)",
            params![id],
        )
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = Database::open_in_memory().unwrap();
        db.with_transaction(|tx| {
            insert_session(tx, "a").storage_context("insert")?;
            insert_session(tx, "b").storage_context("insert")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count_sessions(&db), 2);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.with_transaction(|tx| {
            insert_session(tx, "a").storage_context("insert")?;
            Err(ContinuityError::state("abort"))
        });
        assert!(result.unwrap_err().is_state());
        assert_eq!(count_sessions(&db), 0);
    }

    #[test]
    fn test_constraint_violation_is_storage_error_and_store_stays_usable() {
        let db = Database::open_in_memory().unwrap();
        let result = db.with_transaction(|tx| {
            insert_session(tx, "dup").storage_context("insert")?;
            insert_session(tx, "dup").storage_context("insert")?;
            Ok(())
        });
        assert!(result.unwrap_err().is_storage());
        assert_eq!(count_sessions(&db), 0);

        db.with_transaction(|tx| insert_session(tx, "dup").storage_context("insert"))
            .unwrap();
        assert_eq!(count_sessions(&db), 1);
    }

    #[test]
    fn test_execute_and_query() {
        let db = Database::open_in_memory().unwrap();
        let affected = db
            .execute(
                "INSERT INTO sessions (session_id, started_at, status, process_id) \
                 VALUES (?1, ?2, 'ACTIVE', 1)",
                params!["x", "2024-01-01T00:00:00.000000Z"],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let ids = db
            .query("SELECT session_id FROM sessions", [], |row| row.get::<_, String>(0))
            .unwrap();
        assert_eq!(ids, vec!["x".to_string()]);
    }

    #[test]
    fn test_backup_copies_committed_rows() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("continuity.db")).unwrap();
        db.with_transaction(|tx| insert_session(tx, "kept").storage_context("insert"))
            .unwrap();

        let dest = temp.path().join("backups").join("copy.db");
        db.backup_to(&dest).unwrap();

        let copy = Database::open(&dest).unwrap();
        assert_eq!(count_sessions(&copy), 1);
    }

    #[test]
    fn test_on_disk_store_syncs_every_commit() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("continuity.db")).unwrap();
        let (mode, synchronous) = db
            .with_connection(|conn| {
                let mode: String = conn
                    .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .storage_context("read journal mode")?;
                let synchronous: i64 = conn
                    .query_row("PRAGMA synchronous", [], |row| row.get(0))
                    .storage_context("read synchronous")?;
                Ok((mode, synchronous))
            })
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        // 2 = FULL
        assert_eq!(synchronous, 2);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("continuity.db");
        {
            let db = Database::open(&path).unwrap();
            db.with_transaction(|tx| insert_session(tx, "durable").storage_context("insert"))
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(count_sessions(&db), 1);
        assert_eq!(db.path(), Some(path.as_path()));
    }
}
