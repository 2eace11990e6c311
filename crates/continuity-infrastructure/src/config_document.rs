//! TOML import/export format for configuration entries.
//!
//! ```toml
//! [[entries]]
//! key = "SESSION_TIMEOUT_MINUTES"
//! type = "INTEGER"
//! value = "60"
//! default = "60"
//! description = "Session timeout in minutes"
//! ```
//!
//! Values are kept in their TEXT storage encoding so every type, JSON
//! included, survives TOML unchanged.

use crate::storage::AtomicTomlFile;
use chrono::{DateTime, Utc};
use continuity_core::config::{ConfigEntry, ConfigType};
use continuity_core::{ContinuityError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub config_type: ConfigType,
    pub value: String,
    #[serde(rename = "default")]
    pub default_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub entries: Vec<ConfigRecord>,
}

impl ConfigDocument {
    pub fn from_entries(entries: &[ConfigEntry]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|entry| ConfigRecord {
                    key: entry.key.clone(),
                    config_type: entry.config_type,
                    value: entry.config_type.encode(&entry.value),
                    default_value: entry.config_type.encode(&entry.default_value),
                    description: entry.description.clone(),
                })
                .collect(),
        }
    }

    /// Decodes every record, failing on the first value that does not match
    /// its declared type.
    pub fn into_entries(self, now: DateTime<Utc>) -> Result<Vec<ConfigEntry>> {
        self.entries
            .into_iter()
            .map(|record| {
                let value = record.config_type.decode(&record.value).map_err(|_| {
                    ContinuityError::type_mismatch(&record.key, record.config_type, &record.value)
                })?;
                let default_value = record.config_type.decode(&record.default_value).map_err(|_| {
                    ContinuityError::type_mismatch(
                        &record.key,
                        record.config_type,
                        &record.default_value,
                    )
                })?;
                Ok(ConfigEntry {
                    key: record.key,
                    config_type: record.config_type,
                    default_value,
                    description: record.description,
                    updated_at: now,
                    value,
                })
            })
            .collect()
    }

    /// Writes the document atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        AtomicTomlFile::<ConfigDocument>::new(path.to_path_buf()).save(self)
    }

    /// Reads a document. A missing or blank file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(AtomicTomlFile::<ConfigDocument>::new(path.to_path_buf())
            .load()?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuity_core::clock;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_preserves_types() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("exports").join("config.toml");
        let now = clock::now();
        let entries = vec![
            ConfigEntry::new("LIMIT", json!(10), ConfigType::Integer, Some("cap".into()), now),
            ConfigEntry::new("RATIO", json!(0.5), ConfigType::Float, None, now),
            ConfigEntry::new("FLAGS", json!({"a": [1, null]}), ConfigType::Json, None, now),
        ];

        ConfigDocument::from_entries(&entries).save(&path).unwrap();
        let loaded = ConfigDocument::load(&path).unwrap().into_entries(now).unwrap();
        assert_eq!(loaded, entries);
    }

    #[test]
    fn test_mistyped_record_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "[[entries]]\nkey = \"LIMIT\"\ntype = \"INTEGER\"\nvalue = \"ten\"\ndefault = \"10\"\n",
        )
        .unwrap();

        let err = ConfigDocument::load(&path)
            .unwrap()
            .into_entries(clock::now())
            .unwrap_err();
        assert!(err.is_type());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let doc = ConfigDocument::load(&temp.path().join("absent.toml")).unwrap();
        assert!(doc.entries.is_empty());
    }
}
