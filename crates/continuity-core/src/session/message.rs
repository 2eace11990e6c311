//! Conversation messages recorded within a session.

use super::model::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type MessageId = String;

/// A single message appended to a session's conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub recorded_at: DateTime<Utc>,
    /// Who produced the message, e.g. "user" or "assistant".
    pub source: String,
    pub content: String,
}

impl Message {
    pub fn new(
        session_id: impl Into<SessionId>,
        source: impl Into<String>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            recorded_at: now,
            source: source.into(),
            content: content.into(),
        }
    }
}
