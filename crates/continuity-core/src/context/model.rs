//! Context entries: namespaced key/value state scoped to a session.

use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace used when the caller does not care about grouping.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A single value stored under `(session_id, namespace, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub session_id: SessionId,
    pub namespace: String,
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

impl ContextEntry {
    pub fn new(
        session_id: impl Into<SessionId>,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            namespace: namespace.into(),
            key: key.into(),
            value,
            updated_at: now,
        }
    }
}

/// One recorded write to a context key; `value` is `None` for a deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChange {
    pub session_id: SessionId,
    pub namespace: String,
    pub key: String,
    pub value: Option<Value>,
    pub changed_at: DateTime<Utc>,
}

/// A session's whole context, grouped as `namespace -> key -> value`.
pub type ContextSnapshot = BTreeMap<String, BTreeMap<String, Value>>;

pub type SnapshotId = String;

/// A stored copy of a session's context taken at `saved_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSnapshot {
    pub id: SnapshotId,
    pub session_id: SessionId,
    pub saved_at: DateTime<Utc>,
    pub context: ContextSnapshot,
}

impl SavedSnapshot {
    pub fn new(
        session_id: impl Into<SessionId>,
        context: ContextSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            session_id: session_id.into(),
            saved_at: now,
            context,
        }
    }
}

/// Groups entries into a snapshot.
pub fn to_snapshot(entries: &[ContextEntry]) -> ContextSnapshot {
    let mut snapshot = ContextSnapshot::new();
    for entry in entries {
        snapshot
            .entry(entry.namespace.clone())
            .or_default()
            .insert(entry.key.clone(), entry.value.clone());
    }
    snapshot
}

/// Flattens a snapshot into entries for `session_id`.
pub fn from_snapshot(
    session_id: &str,
    snapshot: &ContextSnapshot,
    now: DateTime<Utc>,
) -> Vec<ContextEntry> {
    snapshot
        .iter()
        .flat_map(|(namespace, values)| {
            values.iter().map(move |(key, value)| {
                ContextEntry::new(session_id, namespace.as_str(), key.as_str(), value.clone(), now)
            })
        })
        .collect()
}
