//! Cross-process ownership marker for the active session.

use crate::session::SessionId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Advisory record naming the session (and process) that currently owns the
/// data directory.
///
/// The marker is paired with a liveness probe and an age check; its presence
/// alone does not prove the owner is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub session_id: SessionId,
    pub process_id: u32,
    pub acquired_at: DateTime<Utc>,
    /// Last heartbeat written by the owner.
    pub refreshed_at: DateTime<Utc>,
}

impl LockMarker {
    pub fn new(session_id: impl Into<SessionId>, process_id: u32, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            process_id,
            acquired_at: now,
            refreshed_at: now,
        }
    }

    /// Returns a copy with the heartbeat moved to `now`.
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        Self {
            refreshed_at: now,
            ..self.clone()
        }
    }

    /// Whether the last heartbeat is older than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.refreshed_at > stale_after
    }

    pub fn is_owned_by(&self, session_id: &str, process_id: u32) -> bool {
        self.session_id == session_id && self.process_id == process_id
    }
}

/// Answers whether an OS process is still running.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, process_id: u32) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_uses_last_heartbeat() {
        let start = Utc::now();
        let marker = LockMarker::new("s", 10, start);
        let stale_after = Duration::seconds(60);

        assert!(!marker.is_stale(start + Duration::seconds(59), stale_after));
        assert!(marker.is_stale(start + Duration::seconds(61), stale_after));

        let refreshed = marker.refreshed(start + Duration::seconds(50));
        assert!(!refreshed.is_stale(start + Duration::seconds(100), stale_after));
        assert_eq!(refreshed.acquired_at, start);
    }

    #[test]
    fn test_is_owned_by() {
        let marker = LockMarker::new("s", 10, Utc::now());
        assert!(marker.is_owned_by("s", 10));
        assert!(!marker.is_owned_by("s", 11));
        assert!(!marker.is_owned_by("t", 10));
    }
}
