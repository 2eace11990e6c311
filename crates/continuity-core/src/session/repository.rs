//! Session and message repository traits.
//!
//! Defines the interface for session persistence operations.

use super::message::Message;
use super::model::{Session, SessionStatus};
use crate::action::ActionId;
use crate::error::Result;
use chrono::{DateTime, Utc};

/// An abstract repository for session rows.
///
/// Implementations must perform every method as a single atomic unit: a
/// failing call leaves no partial writes behind.
pub trait SessionRepository: Send + Sync {
    /// Inserts a new session row.
    fn insert(&self, session: &Session) -> Result<()>;

    /// Inserts a resumed session and copies the context entries of the
    /// session named by `session.resumed_from` into it.
    ///
    /// # Returns
    ///
    /// - `Ok(count)`: number of context entries carried forward
    /// - `Err(NotFound)`: the source session does not exist or is not crashed
    fn insert_resumed(&self, session: &Session) -> Result<usize>;

    /// Finds a session by its ID.
    fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// Marks an active session as completed.
    ///
    /// # Returns
    ///
    /// - `Ok(Session)`: the finished session
    /// - `Err(NotFound)`: unknown session
    /// - `Err(State)`: the session is not active
    fn finish(&self, session_id: &str, ended_at: DateTime<Utc>, summary: Option<&str>)
    -> Result<Session>;

    /// Marks an active session as crashed and every pending action under it
    /// as interrupted.
    ///
    /// # Returns
    ///
    /// The ids of the actions that were interrupted. A session that is no
    /// longer active is left untouched and yields an empty list.
    fn mark_crashed(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<Vec<ActionId>>;

    /// Lists sessions with the given status, newest first.
    fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>>;

    /// Lists the most recent sessions, newest first.
    fn list_recent(&self, limit: usize) -> Result<Vec<Session>>;

    /// Lists sessions resumed from `session_id`, oldest first.
    fn list_resumed_from(&self, session_id: &str) -> Result<Vec<Session>>;
}

/// An abstract repository for conversation messages.
pub trait MessageRepository: Send + Sync {
    /// Appends a message to an active session.
    ///
    /// # Returns
    ///
    /// - `Err(State)`: the session is not active, or already holds
    ///   `max_per_session` messages
    fn append(&self, message: &Message, max_per_session: Option<u64>) -> Result<()>;

    /// Lists up to `limit` messages of a session, oldest first.
    fn list(&self, session_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Counts the messages of a session.
    fn count(&self, session_id: &str) -> Result<u64>;
}
