//! Configuration repository trait.

use super::model::ConfigEntry;
use crate::error::Result;
use chrono::{DateTime, Utc};

/// An abstract repository for global configuration entries.
pub trait ConfigRepository: Send + Sync {
    /// Finds an entry by key.
    fn find(&self, key: &str) -> Result<Option<ConfigEntry>>;

    /// Lists every entry, ordered by key.
    fn list(&self) -> Result<Vec<ConfigEntry>>;

    /// Lists entries whose key starts with `prefix`, ordered by key.
    fn list_prefix(&self, prefix: &str) -> Result<Vec<ConfigEntry>>;

    /// Inserts or updates an entry.
    ///
    /// An existing entry keeps its default value, and keeps its description
    /// when `entry.description` is `None`.
    fn upsert(&self, entry: &ConfigEntry) -> Result<()>;

    /// Upserts many entries in one transaction.
    fn upsert_many(&self, entries: &[ConfigEntry]) -> Result<()>;

    /// Inserts an entry only if its key is absent. Returns whether it was inserted.
    fn insert_if_missing(&self, entry: &ConfigEntry) -> Result<bool>;

    /// Deletes an entry. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Restores an entry's value to its default.
    fn reset(&self, key: &str, at: DateTime<Utc>) -> Result<Option<ConfigEntry>>;

    /// Restores every entry to its default. Returns the number of entries.
    fn reset_all(&self, at: DateTime<Utc>) -> Result<usize>;
}
