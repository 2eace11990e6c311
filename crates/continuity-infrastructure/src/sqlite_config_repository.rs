//! SQLite implementation of [`ConfigRepository`].
//!
//! Values are stored as TEXT encoded by their declared [`ConfigType`].

use crate::storage::sqlite_ext::{SqliteResultExt, format_timestamp, query_all};
use crate::storage::Database;
use chrono::{DateTime, Utc};
use continuity_core::config::{ConfigEntry, ConfigRepository, ConfigType};
use continuity_core::{ContinuityError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

const CONFIG_COLUMNS: &str =
    "config_key, config_value, config_type, default_value, description, updated_at";

/// A configuration row before its values are decoded.
struct RawConfigRow {
    key: String,
    value: String,
    config_type: String,
    default_value: String,
    description: Option<String>,
    updated_at: String,
}

impl RawConfigRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            value: row.get(1)?,
            config_type: row.get(2)?,
            default_value: row.get(3)?,
            description: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_entry(self) -> Result<ConfigEntry> {
        let config_type: ConfigType = self.config_type.parse().map_err(|e| {
            ContinuityError::storage(format!("config '{}': {}", self.key, e))
        })?;
        let value = config_type
            .decode(&self.value)
            .map_err(|_| ContinuityError::type_mismatch(&self.key, config_type, &self.value))?;
        let default_value = config_type
            .decode(&self.default_value)
            .map_err(|_| {
                ContinuityError::type_mismatch(&self.key, config_type, &self.default_value)
            })?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| ContinuityError::storage(format!("config '{}': {}", self.key, e)))?
            .with_timezone(&Utc);

        Ok(ConfigEntry {
            key: self.key,
            config_type,
            default_value,
            description: self.description,
            updated_at,
            value,
        })
    }
}

fn find_entry(conn: &Connection, key: &str) -> Result<Option<ConfigEntry>> {
    conn.query_row(
        &format!("SELECT {} FROM configuration WHERE config_key = ?1", CONFIG_COLUMNS),
        [key],
        RawConfigRow::from_row,
    )
    .optional()
    .storage_context("find config entry")?
    .map(RawConfigRow::into_entry)
    .transpose()
}

fn upsert_entry(conn: &Connection, entry: &ConfigEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO configuration \
         (config_key, config_value, config_type, default_value, description, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(config_key) DO UPDATE SET \
             config_value = excluded.config_value, \
             config_type = excluded.config_type, \
             description = COALESCE(excluded.description, configuration.description), \
             updated_at = excluded.updated_at",
        params![
            entry.key,
            entry.config_type.encode(&entry.value),
            entry.config_type.as_str(),
            entry.config_type.encode(&entry.default_value),
            entry.description,
            format_timestamp(&entry.updated_at),
        ],
    )
    .storage_context("upsert config entry")?;
    Ok(())
}

pub struct SqliteConfigRepository {
    db: Arc<Database>,
}

impl SqliteConfigRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn list_where(&self, clause: &str, arg: Option<&str>) -> Result<Vec<ConfigEntry>> {
        let sql = format!(
            "SELECT {} FROM configuration {} ORDER BY config_key",
            CONFIG_COLUMNS, clause
        );
        let raw = self.db.with_connection(|conn| {
            let rows = match arg {
                Some(arg) => query_all(conn, &sql, [arg], RawConfigRow::from_row),
                None => query_all(conn, &sql, [], RawConfigRow::from_row),
            };
            rows.storage_context("list config entries")
        })?;
        raw.into_iter().map(RawConfigRow::into_entry).collect()
    }
}

impl ConfigRepository for SqliteConfigRepository {
    fn find(&self, key: &str) -> Result<Option<ConfigEntry>> {
        self.db.with_connection(|conn| find_entry(conn, key))
    }

    fn list(&self) -> Result<Vec<ConfigEntry>> {
        self.list_where("", None)
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<ConfigEntry>> {
        // substr avoids LIKE wildcards in user-supplied prefixes
        self.list_where(
            "WHERE substr(config_key, 1, length(?1)) = ?1",
            Some(prefix),
        )
    }

    fn upsert(&self, entry: &ConfigEntry) -> Result<()> {
        self.db.with_transaction(|tx| upsert_entry(tx, entry))
    }

    fn upsert_many(&self, entries: &[ConfigEntry]) -> Result<()> {
        self.db.with_transaction(|tx| {
            for entry in entries {
                upsert_entry(tx, entry)?;
            }
            Ok(())
        })
    }

    fn insert_if_missing(&self, entry: &ConfigEntry) -> Result<bool> {
        let inserted = self.db.with_transaction(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO configuration \
                 (config_key, config_value, config_type, default_value, description, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.key,
                    entry.config_type.encode(&entry.value),
                    entry.config_type.as_str(),
                    entry.config_type.encode(&entry.default_value),
                    entry.description,
                    format_timestamp(&entry.updated_at),
                ],
            )
            .storage_context("seed config entry")
        })?;
        Ok(inserted > 0)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let removed = self
            .db
            .with_transaction(|tx| {
                tx.execute("DELETE FROM configuration WHERE config_key = ?1", [key])
                    .storage_context("delete config entry")
            })?;
        Ok(removed > 0)
    }

    fn reset(&self, key: &str, at: DateTime<Utc>) -> Result<Option<ConfigEntry>> {
        self.db.with_transaction(|tx| {
            tx.execute(
                "UPDATE configuration SET config_value = default_value, updated_at = ?2 \
                 WHERE config_key = ?1",
                params![key, format_timestamp(&at)],
            )
            .storage_context("reset config entry")?;
            find_entry(tx, key)
        })
    }

    fn reset_all(&self, at: DateTime<Utc>) -> Result<usize> {
        self.db.with_transaction(|tx| {
            tx.execute(
                "UPDATE configuration SET config_value = default_value, updated_at = ?1",
                [format_timestamp(&at)],
            )
            .storage_context("reset config entries")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuity_core::clock;
    use continuity_core::config::keys;
    use serde_json::json;

    fn repo() -> SqliteConfigRepository {
        SqliteConfigRepository::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let repo = repo();
        for entry in keys::default_entries(clock::now()) {
            assert!(repo.insert_if_missing(&entry).unwrap());
        }

        let mut changed = repo.find(keys::SESSION_TIMEOUT_MINUTES).unwrap().unwrap();
        changed.value = json!(15);
        repo.upsert(&changed).unwrap();

        for entry in keys::default_entries(clock::now()) {
            assert!(!repo.insert_if_missing(&entry).unwrap());
        }
        let kept = repo.find(keys::SESSION_TIMEOUT_MINUTES).unwrap().unwrap();
        assert_eq!(kept.value, json!(15));
        assert_eq!(kept.default_value, json!(60));
    }

    #[test]
    fn test_upsert_keeps_default_and_description() {
        let repo = repo();
        let entry = ConfigEntry::new(
            "THEME",
            json!("dark"),
            ConfigType::Text,
            Some("UI theme".to_string()),
            clock::now(),
        );
        repo.upsert(&entry).unwrap();

        let update =
            ConfigEntry::new("THEME", json!("light"), ConfigType::Text, None, clock::now());
        repo.upsert(&update).unwrap();

        let found = repo.find("THEME").unwrap().unwrap();
        assert_eq!(found.value, json!("light"));
        assert_eq!(found.default_value, json!("dark"));
        assert_eq!(found.description.as_deref(), Some("UI theme"));
    }

    #[test]
    fn test_reset_and_prefix_listing() {
        let repo = repo();
        for (key, value) in [("UI_THEME", "dark"), ("UI_FONT", "mono"), ("LOG_LEVEL", "info")] {
            repo.upsert(&ConfigEntry::new(key, json!(value), ConfigType::Text, None, clock::now()))
                .unwrap();
        }
        let mut theme = repo.find("UI_THEME").unwrap().unwrap();
        theme.value = json!("light");
        repo.upsert(&theme).unwrap();

        let ui: Vec<_> = repo
            .list_prefix("UI_")
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(ui, vec!["UI_FONT", "UI_THEME"]);
        assert!(repo.list_prefix("U%").unwrap().is_empty());

        let reset = repo.reset("UI_THEME", clock::now()).unwrap().unwrap();
        assert_eq!(reset.value, json!("dark"));
        assert!(repo.reset("MISSING", clock::now()).unwrap().is_none());
        assert_eq!(repo.reset_all(clock::now()).unwrap(), 3);
    }

    #[test]
    fn test_corrupt_value_is_type_error() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.execute(
            "INSERT INTO configuration \
             (config_key, config_value, config_type, default_value, updated_at) \
             VALUES ('N', 'not-a-number', 'INTEGER', '1', ?1)",
            [format_timestamp(&clock::now())],
        )
        .unwrap();
        let repo = SqliteConfigRepository::new(db);
        assert!(repo.find("N").unwrap_err().is_type());
    }

    #[test]
    fn test_delete() {
        let repo = repo();
        repo.upsert(&ConfigEntry::new("X", json!(1), ConfigType::Integer, None, clock::now()))
            .unwrap();
        assert!(repo.delete("X").unwrap());
        assert!(!repo.delete("X").unwrap());
        assert!(repo.list().unwrap().is_empty());
    }
}
