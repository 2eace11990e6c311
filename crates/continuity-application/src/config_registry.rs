//! Typed global configuration with a read-through cache.

use crate::cache::StateCache;
use continuity_core::clock;
use continuity_core::config::{keys, value_kind, ConfigEntry, ConfigRepository, ConfigType};
use continuity_core::{ContinuityError, Result};
use continuity_infrastructure::config_document::ConfigDocument;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Global, typed key/value configuration.
///
/// Reads are served from [`StateCache`] after the first load; writes go to
/// the store first and then update the cache under the same lock.
pub struct ConfigRegistry {
    repo: Arc<dyn ConfigRepository>,
    cache: Arc<StateCache>,
}

impl ConfigRegistry {
    pub fn new(repo: Arc<dyn ConfigRepository>, cache: Arc<StateCache>) -> Self {
        Self { repo, cache }
    }

    /// Inserts the well-known defaults that are not present yet.
    ///
    /// Returns the number of inserted entries.
    pub fn seed_defaults(&self) -> Result<usize> {
        let mut state = self.cache.lock()?;
        let mut inserted = 0;
        for entry in keys::default_entries(clock::now()) {
            if self.repo.insert_if_missing(&entry)? {
                inserted += 1;
            }
        }
        if inserted > 0 {
            tracing::info!("Seeded {} default configuration entries", inserted);
            state.drop_config();
        }
        Ok(inserted)
    }

    /// Full entry for `key`, including type, default and description.
    pub fn details(&self, key: &str) -> Result<Option<ConfigEntry>> {
        let mut state = self.cache.lock()?;
        let config = state.config_or_load(|| self.repo.list())?;
        Ok(config.get(key).cloned())
    }

    /// Every entry, ordered by key.
    pub fn all_details(&self) -> Result<Vec<ConfigEntry>> {
        let mut state = self.cache.lock()?;
        let config = state.config_or_load(|| self.repo.list())?;
        Ok(config.values().cloned().collect())
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.details(key)?.map(|entry| entry.value))
    }

    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        self.typed(key, default, &[ConfigType::Integer], Value::as_i64)
    }

    /// Reads a float; integer entries are widened.
    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64> {
        self.typed(
            key,
            default,
            &[ConfigType::Float, ConfigType::Integer],
            Value::as_f64,
        )
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        self.typed(key, default, &[ConfigType::Boolean], Value::as_bool)
    }

    pub fn get_string(&self, key: &str, default: &str) -> Result<String> {
        self.typed(key, default.to_string(), &[ConfigType::Text], |v| {
            v.as_str().map(str::to_string)
        })
    }

    fn typed<T>(
        &self,
        key: &str,
        default: T,
        accepted: &[ConfigType],
        extract: impl Fn(&Value) -> Option<T>,
    ) -> Result<T> {
        let Some(entry) = self.details(key)? else {
            return Ok(default);
        };
        if !accepted.contains(&entry.config_type) {
            return Err(ContinuityError::type_mismatch(
                key,
                accepted[0],
                entry.config_type.as_str(),
            ));
        }
        extract(&entry.value).ok_or_else(|| {
            ContinuityError::type_mismatch(key, accepted[0], value_kind(&entry.value))
        })
    }

    /// Sets a value.
    ///
    /// The declared type is `config_type` when given, else the existing
    /// entry's type, else inferred from `value`. The value must match it, and
    /// an existing entry's type cannot be changed.
    pub fn set(
        &self,
        key: &str,
        value: Value,
        config_type: Option<ConfigType>,
        description: Option<&str>,
    ) -> Result<()> {
        let mut state = self.cache.lock()?;
        let existing = state
            .config_or_load(|| self.repo.list())?
            .get(key)
            .cloned();

        let declared = match (&existing, config_type) {
            (Some(entry), Some(requested)) if entry.config_type != requested => {
                return Err(ContinuityError::type_mismatch(
                    key,
                    entry.config_type,
                    requested.as_str(),
                ));
            }
            (Some(entry), _) => entry.config_type,
            (None, Some(requested)) => requested,
            (None, None) => ConfigType::infer(&value),
        };
        if !declared.accepts(&value) {
            return Err(ContinuityError::type_mismatch(key, declared, value_kind(&value)));
        }

        let now = clock::now();
        let entry = match existing {
            Some(mut entry) => {
                entry.value = value;
                entry.updated_at = now;
                if let Some(description) = description {
                    entry.description = Some(description.to_string());
                }
                entry
            }
            None => ConfigEntry::new(key, value, declared, description.map(str::to_string), now),
        };

        self.repo.upsert(&entry)?;
        tracing::debug!("Set config {} ({})", key, declared);
        state.put_config(entry);
        Ok(())
    }

    /// Removes an entry. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.cache.lock()?;
        let removed = self.repo.delete(key)?;
        state.remove_config(key);
        Ok(removed)
    }

    /// Restores an entry to its default value.
    pub fn reset_to_default(&self, key: &str) -> Result<ConfigEntry> {
        let mut state = self.cache.lock()?;
        let entry = self
            .repo
            .reset(key, clock::now())?
            .ok_or_else(|| ContinuityError::not_found("config entry", key))?;
        state.put_config(entry.clone());
        Ok(entry)
    }

    pub fn reset_all_to_default(&self) -> Result<usize> {
        let mut state = self.cache.lock()?;
        let count = self.repo.reset_all(clock::now())?;
        state.drop_config();
        tracing::info!("Reset {} configuration entries to defaults", count);
        Ok(count)
    }

    /// Values of every key starting with `prefix`.
    pub fn group(&self, prefix: &str) -> Result<BTreeMap<String, Value>> {
        let mut state = self.cache.lock()?;
        let config = state.config_or_load(|| self.repo.list())?;
        Ok(config
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    /// Writes every entry to a TOML document at `path`.
    pub fn export_toml(&self, path: &Path) -> Result<usize> {
        let entries = self.all_details()?;
        ConfigDocument::from_entries(&entries).save(path)?;
        tracing::info!("Exported {} configuration entries to {:?}", entries.len(), path);
        Ok(entries.len())
    }

    /// Imports every entry of a TOML document in one transaction.
    ///
    /// Nothing is written if any record is mistyped or conflicts with the
    /// declared type of an existing entry.
    pub fn import_toml(&self, path: &Path) -> Result<usize> {
        let entries = ConfigDocument::load(path)?.into_entries(clock::now())?;

        let mut state = self.cache.lock()?;
        let current = state.config_or_load(|| self.repo.list())?;
        for entry in &entries {
            if !entry.config_type.accepts(&entry.value) {
                return Err(ContinuityError::type_mismatch(
                    &entry.key,
                    entry.config_type,
                    value_kind(&entry.value),
                ));
            }
            if let Some(existing) = current.get(&entry.key) {
                if existing.config_type != entry.config_type {
                    return Err(ContinuityError::type_mismatch(
                        &entry.key,
                        existing.config_type,
                        entry.config_type.as_str(),
                    ));
                }
            }
        }

        self.repo.upsert_many(&entries)?;
        state.drop_config();
        tracing::info!("Imported {} configuration entries from {:?}", entries.len(), path);
        Ok(entries.len())
    }
}
