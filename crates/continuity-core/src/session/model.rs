//! Session domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a session (a time-ordered UUIDv7 string).
pub type SessionId = String;

/// Lifecycle status of a session.
///
/// `Active → {Completed | Crashed}`. A crashed session is never re-activated
/// in place; resuming it creates a new session that links back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Completed,
    Crashed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Crashed => "CRASHED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "COMPLETED" => Ok(SessionStatus::Completed),
            "CRASHED" => Ok(SessionStatus::Crashed),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// One bounded period of work with its own context and action history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Time-ordered unique identifier.
    pub id: SessionId,
    /// When the session was started (or resumed).
    pub started_at: DateTime<Utc>,
    /// When the session ended; `None` while active.
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Summary supplied at a clean end.
    pub summary: Option<String>,
    /// The crashed session this one was resumed from.
    pub resumed_from: Option<SessionId>,
    /// Process that created the session.
    pub process_id: u32,
}

impl Session {
    /// Creates a new active session owned by `process_id`.
    pub fn start(process_id: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: new_session_id(),
            started_at: now,
            ended_at: None,
            status: SessionStatus::Active,
            summary: None,
            resumed_from: None,
            process_id,
        }
    }

    /// Creates a new active session that continues `crashed_id`.
    pub fn resume_of(
        crashed_id: impl Into<SessionId>,
        process_id: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            resumed_from: Some(crashed_id.into()),
            ..Self::start(process_id, now)
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Generates a new time-ordered session identifier.
pub fn new_session_id() -> SessionId {
    Uuid::now_v7().to_string()
}

/// Read-only snapshot of a session for external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session: Session,
    pub message_count: u64,
    pub action_count: u64,
    pub pending_action_count: u64,
    /// Sessions that were resumed from this one, oldest first.
    pub resumed_into: Vec<SessionId>,
}
