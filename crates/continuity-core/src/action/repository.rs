//! Action repository trait.

use super::model::{Action, ActionFilter, ActionStats, ActionStatus};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// An abstract repository for the action ledger.
pub trait ActionRepository: Send + Sync {
    /// Inserts a pending action under an active session.
    ///
    /// # Returns
    ///
    /// - `Err(State)`: the session is not active, or already holds
    ///   `max_per_session` actions
    fn insert_pending(&self, action: &Action, max_per_session: Option<u64>) -> Result<()>;

    /// Moves a pending action to a terminal status.
    ///
    /// The check and the update happen atomically, so exactly one of two
    /// racing transitions succeeds.
    ///
    /// # Returns
    ///
    /// - `Ok(Action)`: the updated action
    /// - `Err(NotFound)`: unknown action
    /// - `Err(State)`: the action is not pending
    fn transition(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: Option<&Value>,
        ended_at: DateTime<Utc>,
    ) -> Result<Action>;

    /// Finds an action by its ID.
    fn find_by_id(&self, action_id: &str) -> Result<Option<Action>>;

    /// Lists a session's actions, newest first.
    fn list(&self, session_id: &str, filter: &ActionFilter) -> Result<Vec<Action>>;

    /// Aggregates counts by status and type.
    fn stats(&self, session_id: &str) -> Result<ActionStats>;
}
