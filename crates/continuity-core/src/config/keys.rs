//! Well-known configuration keys consumed by the engine.

use super::model::{ConfigEntry, ConfigType};
use chrono::{DateTime, Utc};
use serde_json::json;

pub const SESSION_TIMEOUT_MINUTES: &str = "SESSION_TIMEOUT_MINUTES";
pub const MAX_MESSAGES_PER_SESSION: &str = "MAX_MESSAGES_PER_SESSION";
pub const MAX_ACTIONS_PER_SESSION: &str = "MAX_ACTIONS_PER_SESSION";
pub const CRASH_DETECTION_STALE_SECONDS: &str = "CRASH_DETECTION_STALE_SECONDS";
pub const STATE_BACKUP_COUNT: &str = "STATE_BACKUP_COUNT";

/// Entries seeded into an empty registry.
pub fn default_entries(now: DateTime<Utc>) -> Vec<ConfigEntry> {
    vec![
        ConfigEntry::new(
            SESSION_TIMEOUT_MINUTES,
            json!(60),
            ConfigType::Integer,
            Some("Session timeout in minutes".to_string()),
            now,
        ),
        ConfigEntry::new(
            MAX_MESSAGES_PER_SESSION,
            json!(1000),
            ConfigType::Integer,
            Some("Maximum number of messages per session".to_string()),
            now,
        ),
        ConfigEntry::new(
            MAX_ACTIONS_PER_SESSION,
            json!(1000),
            ConfigType::Integer,
            Some("Maximum number of actions per session".to_string()),
            now,
        ),
        ConfigEntry::new(
            CRASH_DETECTION_STALE_SECONDS,
            json!(3600),
            ConfigType::Integer,
            Some("Seconds without a heartbeat before a lock owner is considered gone".to_string()),
            now,
        ),
        ConfigEntry::new(
            STATE_BACKUP_COUNT,
            json!(5),
            ConfigType::Integer,
            Some("Number of database backups to keep".to_string()),
            now,
        ),
    ]
}
