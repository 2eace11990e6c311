//! Namespaced per-session context with write-through caching.

use crate::cache::{NamespaceValues, StateCache};
use continuity_core::clock;
use continuity_core::context::{
    from_snapshot, to_snapshot, ContextChange, ContextEntry, ContextRepository, ContextSnapshot,
    SavedSnapshot, SnapshotId,
};
use continuity_core::{ContinuityError, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Key/value context scoped to `(session, namespace)`.
///
/// Every write requires the session to be active and is committed to the
/// store before the cache changes. Reads of the pinned session are served
/// from the cache; reads of any other session go to the store.
pub struct ContextStore {
    repo: Arc<dyn ContextRepository>,
    cache: Arc<StateCache>,
}

impl ContextStore {
    pub fn new(repo: Arc<dyn ContextRepository>, cache: Arc<StateCache>) -> Self {
        Self { repo, cache }
    }

    pub fn set(&self, session_id: &str, namespace: &str, key: &str, value: Value) -> Result<()> {
        let mut state = self.cache.lock()?;
        let entry = ContextEntry::new(session_id, namespace, key, value, clock::now());
        self.repo.upsert(&entry)?;
        state.put_value(session_id, namespace, key, entry.value);
        Ok(())
    }

    pub fn get(&self, session_id: &str, namespace: &str, key: &str) -> Result<Option<Value>> {
        self.get_namespace_ref(session_id, namespace, |values| values.get(key).cloned())
    }

    pub fn get_namespace(&self, session_id: &str, namespace: &str) -> Result<NamespaceValues> {
        self.get_namespace_ref(session_id, namespace, |values| values.clone())
    }

    fn get_namespace_ref<T>(
        &self,
        session_id: &str,
        namespace: &str,
        f: impl FnOnce(&NamespaceValues) -> T,
    ) -> Result<T> {
        let mut state = self.cache.lock()?;
        if !state.is_pinned(session_id) {
            drop(state);
            let values: NamespaceValues = self
                .repo
                .list_namespace(session_id, namespace)?
                .into_iter()
                .map(|entry| (entry.key, entry.value))
                .collect();
            return Ok(f(&values));
        }
        let values = state.namespace_or_load(session_id, namespace, || {
            self.repo.list_namespace(session_id, namespace)
        })?;
        Ok(f(values))
    }

    pub fn has(&self, session_id: &str, namespace: &str, key: &str) -> Result<bool> {
        self.get_namespace_ref(session_id, namespace, |values| values.contains_key(key))
    }

    /// Keys of a namespace, optionally restricted to a prefix.
    pub fn keys(
        &self,
        session_id: &str,
        namespace: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>> {
        self.get_namespace_ref(session_id, namespace, |values| {
            values
                .keys()
                .filter(|key| prefix.is_none_or(|p| key.starts_with(p)))
                .cloned()
                .collect()
        })
    }

    /// Removes one key. Returns whether it existed.
    pub fn clear(&self, session_id: &str, namespace: &str, key: &str) -> Result<bool> {
        let mut state = self.cache.lock()?;
        let removed = self.repo.delete(session_id, namespace, key)?;
        state.remove_value(session_id, namespace, key);
        Ok(removed)
    }

    /// Removes a whole namespace. Returns the number of removed keys.
    pub fn clear_namespace(&self, session_id: &str, namespace: &str) -> Result<usize> {
        let mut state = self.cache.lock()?;
        let removed = self.repo.delete_namespace(session_id, namespace)?;
        state.drop_namespace(session_id, namespace);
        Ok(removed)
    }

    /// Names of every namespace holding at least one key.
    pub fn namespaces(&self, session_id: &str) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .repo
            .list_session(session_id)?
            .into_iter()
            .map(|entry| entry.namespace)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Size of the session's whole context encoded as JSON, in bytes.
    pub fn size_bytes(&self, session_id: &str) -> Result<usize> {
        Ok(serde_json::to_vec(&self.export(session_id)?)?.len())
    }

    /// Sets many keys of one namespace in a single transaction.
    pub fn merge(
        &self,
        session_id: &str,
        namespace: &str,
        values: NamespaceValues,
    ) -> Result<()> {
        let now = clock::now();
        let entries: Vec<ContextEntry> = values
            .into_iter()
            .map(|(key, value)| ContextEntry::new(session_id, namespace, key, value, now))
            .collect();

        let mut state = self.cache.lock()?;
        self.repo.upsert_many(session_id, &entries)?;
        for entry in entries {
            state.put_value(session_id, namespace, &entry.key, entry.value);
        }
        Ok(())
    }

    /// Every namespace of a session, read straight from the store.
    pub fn export(&self, session_id: &str) -> Result<ContextSnapshot> {
        Ok(to_snapshot(&self.repo.list_session(session_id)?))
    }

    /// Replaces the session's whole context with `snapshot` atomically.
    pub fn import(&self, session_id: &str, snapshot: &ContextSnapshot) -> Result<usize> {
        let entries = from_snapshot(session_id, snapshot, clock::now());
        let mut state = self.cache.lock()?;
        self.repo.replace_all(session_id, &entries)?;
        state.drop_session(session_id);
        tracing::debug!("Imported {} context entries into {}", entries.len(), session_id);
        Ok(entries.len())
    }

    /// Copies entries from `from` into the active session `to`.
    ///
    /// With `namespace` set only that namespace is copied. Existing keys in
    /// `to` are overwritten. Returns the number of copied entries.
    pub fn transfer(&self, from: &str, to: &str, namespace: Option<&str>) -> Result<usize> {
        let source = match namespace {
            Some(ns) => self.repo.list_namespace(from, ns)?,
            None => self.repo.list_session(from)?,
        };
        let now = clock::now();
        let entries: Vec<ContextEntry> = source
            .into_iter()
            .map(|entry| ContextEntry::new(to, entry.namespace, entry.key, entry.value, now))
            .collect();

        let mut state = self.cache.lock()?;
        self.repo.upsert_many(to, &entries)?;
        for entry in &entries {
            state.put_value(to, &entry.namespace, &entry.key, entry.value.clone());
        }
        tracing::debug!("Transferred {} context entries from {} to {}", entries.len(), from, to);
        Ok(entries.len())
    }

    /// Recorded values of one key, newest first; `None` marks a removal.
    pub fn history(
        &self,
        session_id: &str,
        namespace: &str,
        key: &str,
        limit: usize,
    ) -> Result<Vec<ContextChange>> {
        self.repo.history(session_id, namespace, key, limit)
    }

    /// Stores a copy of the session's whole context.
    pub fn save_snapshot(&self, session_id: &str) -> Result<SnapshotId> {
        let snapshot = SavedSnapshot::new(session_id, self.export(session_id)?, clock::now());
        self.repo.save_snapshot(&snapshot)?;
        tracing::debug!("Saved context snapshot {} for {}", snapshot.id, session_id);
        Ok(snapshot.id)
    }

    pub fn snapshots(&self, session_id: &str, limit: usize) -> Result<Vec<SavedSnapshot>> {
        self.repo.list_snapshots(session_id, limit)
    }

    pub fn snapshot(&self, snapshot_id: &str) -> Result<SavedSnapshot> {
        self.repo
            .find_snapshot(snapshot_id)?
            .ok_or_else(|| ContinuityError::not_found("context snapshot", snapshot_id))
    }

    /// Replaces the context of `session_id` with a saved snapshot, which may
    /// come from any session.
    pub fn restore_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<usize> {
        let snapshot = self.snapshot(snapshot_id)?;
        self.import(session_id, &snapshot.context)
    }

    /// Caches only the namespaces of `session_id` from now on.
    pub fn pin(&self, session_id: &str) -> Result<()> {
        self.cache.pin_session(session_id)
    }

    /// Drops cached namespaces of a session that is no longer active.
    pub fn evict(&self, session_id: &str) -> Result<()> {
        self.cache.evict_session(session_id)
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self, session_id: &str, namespace: &str) -> bool {
        self.cache
            .lock()
            .is_ok_and(|state| state.namespace(session_id, namespace).is_some())
    }
}
