//! Context repository trait.

use super::model::{ContextChange, ContextEntry, SavedSnapshot};
use crate::error::Result;

/// An abstract repository for session context entries.
///
/// Every mutating method requires the target session to be active and
/// returns `Err(State)` otherwise. Multi-entry writes are all-or-nothing.
/// Every write and deletion is journalled in the same transaction, so
/// [`ContextRepository::history`] never disagrees with the live entries.
pub trait ContextRepository: Send + Sync {
    /// Inserts or replaces a single entry.
    fn upsert(&self, entry: &ContextEntry) -> Result<()>;

    /// Inserts or replaces many entries of one session atomically.
    fn upsert_many(&self, session_id: &str, entries: &[ContextEntry]) -> Result<()>;

    /// Replaces the whole context of a session atomically.
    fn replace_all(&self, session_id: &str, entries: &[ContextEntry]) -> Result<()>;

    /// Finds a single entry.
    fn find(&self, session_id: &str, namespace: &str, key: &str) -> Result<Option<ContextEntry>>;

    /// Lists the entries of one namespace, ordered by key.
    fn list_namespace(&self, session_id: &str, namespace: &str) -> Result<Vec<ContextEntry>>;

    /// Lists every entry of a session, ordered by namespace then key.
    fn list_session(&self, session_id: &str) -> Result<Vec<ContextEntry>>;

    /// Deletes a single entry. Returns whether it existed.
    fn delete(&self, session_id: &str, namespace: &str, key: &str) -> Result<bool>;

    /// Deletes a whole namespace. Returns the number of removed entries.
    fn delete_namespace(&self, session_id: &str, namespace: &str) -> Result<usize>;

    /// Recorded changes of one key, newest first, at most `limit`.
    fn history(
        &self,
        session_id: &str,
        namespace: &str,
        key: &str,
        limit: usize,
    ) -> Result<Vec<ContextChange>>;

    /// Stores a whole-context snapshot. The session must be active.
    fn save_snapshot(&self, snapshot: &SavedSnapshot) -> Result<()>;

    /// Snapshots of a session, newest first, at most `limit`.
    fn list_snapshots(&self, session_id: &str, limit: usize) -> Result<Vec<SavedSnapshot>>;

    fn find_snapshot(&self, snapshot_id: &str) -> Result<Option<SavedSnapshot>>;
}
