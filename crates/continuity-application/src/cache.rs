use continuity_core::config::ConfigEntry;
use continuity_core::context::ContextEntry;
use continuity_core::{ContinuityError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Values of one namespace, keyed by context key.
pub type NamespaceValues = BTreeMap<String, Value>;

/// Process-wide cache for context namespaces and configuration entries.
///
/// The store stays the source of truth. Writers hold the cache lock across
/// their store write and the cache update, so a reader never observes a
/// cached value older than a committed one. Only the namespaces of the
/// pinned session (the one this process owns) are kept.
#[derive(Default)]
pub struct StateCache {
    state: Mutex<CacheState>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| ContinuityError::state("state cache mutex poisoned"))
    }

    /// Drops every cached namespace of a session.
    pub fn evict_session(&self, session_id: &str) -> Result<()> {
        self.lock()?.drop_session(session_id);
        Ok(())
    }

    /// Makes `session_id` the only session whose namespaces are cached.
    pub fn pin_session(&self, session_id: &str) -> Result<()> {
        self.lock()?.pin_session(session_id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CacheState {
    namespaces: HashMap<(String, String), NamespaceValues>,
    pinned: Option<String>,
    config: Option<BTreeMap<String, ConfigEntry>>,
}

impl CacheState {
    // ============================================================================
    // Context namespaces
    // ============================================================================

    pub fn is_pinned(&self, session_id: &str) -> bool {
        self.pinned.as_deref() == Some(session_id)
    }

    pub fn pin_session(&mut self, session_id: &str) {
        self.namespaces.retain(|(sid, _), _| sid == session_id);
        self.pinned = Some(session_id.to_string());
    }

    pub fn namespace(&self, session_id: &str, namespace: &str) -> Option<&NamespaceValues> {
        self.namespaces
            .get(&(session_id.to_string(), namespace.to_string()))
    }

    /// Returns the cached namespace, loading it with `load` on a miss.
    pub fn namespace_or_load<F>(
        &mut self,
        session_id: &str,
        namespace: &str,
        load: F,
    ) -> Result<&NamespaceValues>
    where
        F: FnOnce() -> Result<Vec<ContextEntry>>,
    {
        let slot = (session_id.to_string(), namespace.to_string());
        if !self.namespaces.contains_key(&slot) {
            let values = load()?
                .into_iter()
                .map(|entry| (entry.key, entry.value))
                .collect();
            tracing::debug!("Loaded context namespace {}/{}", session_id, namespace);
            self.namespaces.insert(slot.clone(), values);
        }
        self.namespaces
            .get(&slot)
            .ok_or_else(|| ContinuityError::state("context namespace vanished from cache"))
    }

    /// Updates a value if its namespace is loaded; otherwise the next read loads it.
    pub fn put_value(&mut self, session_id: &str, namespace: &str, key: &str, value: Value) {
        if let Some(values) = self
            .namespaces
            .get_mut(&(session_id.to_string(), namespace.to_string()))
        {
            values.insert(key.to_string(), value);
        }
    }

    pub fn remove_value(&mut self, session_id: &str, namespace: &str, key: &str) {
        if let Some(values) = self
            .namespaces
            .get_mut(&(session_id.to_string(), namespace.to_string()))
        {
            values.remove(key);
        }
    }

    pub fn drop_namespace(&mut self, session_id: &str, namespace: &str) {
        self.namespaces
            .remove(&(session_id.to_string(), namespace.to_string()));
    }

    pub fn drop_session(&mut self, session_id: &str) {
        self.namespaces.retain(|(sid, _), _| sid != session_id);
        if self.is_pinned(session_id) {
            self.pinned = None;
        }
    }

    // ============================================================================
    // Configuration
    // ============================================================================

    /// Returns every cached config entry, loading them with `load` on a miss.
    pub fn config_or_load<F>(&mut self, load: F) -> Result<&BTreeMap<String, ConfigEntry>>
    where
        F: FnOnce() -> Result<Vec<ConfigEntry>>,
    {
        if self.config.is_none() {
            let entries = load()?
                .into_iter()
                .map(|entry| (entry.key.clone(), entry))
                .collect();
            self.config = Some(entries);
        }
        self.config
            .as_ref()
            .ok_or_else(|| ContinuityError::state("configuration vanished from cache"))
    }

    pub fn put_config(&mut self, entry: ConfigEntry) {
        if let Some(config) = self.config.as_mut() {
            config.insert(entry.key.clone(), entry);
        }
    }

    pub fn remove_config(&mut self, key: &str) {
        if let Some(config) = self.config.as_mut() {
            config.remove(key);
        }
    }

    pub fn drop_config(&mut self) {
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuity_core::clock;
    use serde_json::json;

    fn entry(key: &str, value: Value) -> ContextEntry {
        ContextEntry::new("s", "ns", key, value, clock::now())
    }

    #[test]
    fn test_namespace_loads_once() {
        let cache = StateCache::new();
        let mut state = cache.lock().unwrap();
        let mut loads = 0;

        let values = state
            .namespace_or_load("s", "ns", || {
                loads += 1;
                Ok(vec![entry("a", json!(1))])
            })
            .unwrap();
        assert_eq!(values["a"], json!(1));

        state
            .namespace_or_load("s", "ns", || {
                loads += 1;
                Ok(vec![])
            })
            .unwrap();
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_put_value_only_touches_loaded_namespaces() {
        let cache = StateCache::new();
        let mut state = cache.lock().unwrap();

        state.put_value("s", "ns", "a", json!(1));
        assert!(state.namespace("s", "ns").is_none());

        state.namespace_or_load("s", "ns", || Ok(vec![])).unwrap();
        state.put_value("s", "ns", "a", json!(2));
        assert_eq!(state.namespace("s", "ns").unwrap()["a"], json!(2));

        state.remove_value("s", "ns", "a");
        assert!(state.namespace("s", "ns").unwrap().is_empty());
    }

    #[test]
    fn test_evict_session() {
        let cache = StateCache::new();
        {
            let mut state = cache.lock().unwrap();
            state.namespace_or_load("s", "a", || Ok(vec![])).unwrap();
            state.namespace_or_load("s", "b", || Ok(vec![])).unwrap();
            state.namespace_or_load("t", "a", || Ok(vec![])).unwrap();
        }
        cache.evict_session("s").unwrap();

        let state = cache.lock().unwrap();
        assert!(state.namespace("s", "a").is_none());
        assert!(state.namespace("s", "b").is_none());
        assert!(state.namespace("t", "a").is_some());
    }

    #[test]
    fn test_pinning_drops_other_sessions() {
        let cache = StateCache::new();
        {
            let mut state = cache.lock().unwrap();
            state.namespace_or_load("old", "a", || Ok(vec![])).unwrap();
            state.namespace_or_load("new", "a", || Ok(vec![])).unwrap();
        }
        cache.pin_session("new").unwrap();
        {
            let state = cache.lock().unwrap();
            assert!(state.is_pinned("new"));
            assert!(!state.is_pinned("old"));
            assert!(state.namespace("old", "a").is_none());
            assert!(state.namespace("new", "a").is_some());
        }

        cache.evict_session("new").unwrap();
        let state = cache.lock().unwrap();
        assert!(!state.is_pinned("new"));
        assert!(state.namespace("new", "a").is_none());
    }

    #[test]
    fn test_failed_load_leaves_cache_empty() {
        let cache = StateCache::new();
        let mut state = cache.lock().unwrap();
        let result = state.namespace_or_load("s", "ns", || Err(ContinuityError::storage("disk")));
        assert!(result.is_err());
        assert!(state.namespace("s", "ns").is_none());
    }
}
