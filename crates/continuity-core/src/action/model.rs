//! Action ledger model.

use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type ActionId = String;

/// Status of a ledger entry.
///
/// `Pending → {Completed | Failed | Interrupted}`. Terminal states never
/// change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
    /// The owning session crashed while the action was still pending.
    Interrupted,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "PENDING",
            ActionStatus::Completed => "COMPLETED",
            ActionStatus::Failed => "FAILED",
            ActionStatus::Interrupted => "INTERRUPTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::Pending)
    }

    /// Returns true when `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        matches!(
            (self, next),
            (
                ActionStatus::Pending,
                ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Interrupted
            )
        )
    }

    /// Whether an action in this status may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionStatus::Failed | ActionStatus::Interrupted)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ActionStatus::Pending),
            "COMPLETED" => Ok(ActionStatus::Completed),
            "FAILED" => Ok(ActionStatus::Failed),
            "INTERRUPTED" => Ok(ActionStatus::Interrupted),
            other => Err(format!("unknown action status '{}'", other)),
        }
    }
}

/// A single recorded unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub session_id: SessionId,
    pub action_type: String,
    pub status: ActionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Structured input; `Value::Null` when none was given.
    pub params: Value,
    /// Result on success, error info on failure.
    pub result: Option<Value>,
}

impl Action {
    /// Creates a new pending action.
    pub fn pending(
        session_id: impl Into<SessionId>,
        action_type: impl Into<String>,
        params: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            action_type: action_type.into(),
            status: ActionStatus::Pending,
            started_at: now,
            ended_at: None,
            params,
            result: None,
        }
    }

    /// The action this one retries, if any.
    pub fn retry_of(&self) -> Option<&str> {
        self.params.get(RETRY_OF_PARAM).and_then(Value::as_str)
    }
}

/// Parameter key linking a retry to its original action.
pub const RETRY_OF_PARAM: &str = "retry_of";

/// Filter for listing actions. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilter {
    pub status: Option<ActionStatus>,
    pub action_type: Option<String>,
    pub limit: Option<usize>,
}

impl ActionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregate counts over a session's actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStats {
    pub total: u64,
    pub by_status: BTreeMap<ActionStatus, u64>,
    pub by_type: BTreeMap<String, u64>,
}

impl ActionStats {
    pub fn count(&self, status: ActionStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_pending_can_transition() {
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Completed));
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Failed));
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Interrupted));
        assert!(!ActionStatus::Pending.can_transition_to(ActionStatus::Pending));
        assert!(!ActionStatus::Completed.can_transition_to(ActionStatus::Failed));
        assert!(!ActionStatus::Failed.can_transition_to(ActionStatus::Completed));
        assert!(!ActionStatus::Interrupted.can_transition_to(ActionStatus::Completed));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(ActionStatus::Failed.is_retryable());
        assert!(ActionStatus::Interrupted.is_retryable());
        assert!(!ActionStatus::Completed.is_retryable());
        assert!(!ActionStatus::Pending.is_retryable());
    }

    #[test]
    fn test_retry_of_reads_params() {
        let action = Action::pending("s", "t", json!({"retry_of": "a-1", "n": 1}), Utc::now());
        assert_eq!(action.retry_of(), Some("a-1"));
        let plain = Action::pending("s", "t", Value::Null, Utc::now());
        assert_eq!(plain.retry_of(), None);
    }

    #[test]
    fn test_filter_builder() {
        let filter = ActionFilter::new()
            .with_status(ActionStatus::Failed)
            .with_type("deploy")
            .with_limit(5);
        assert_eq!(filter.status, Some(ActionStatus::Failed));
        assert_eq!(filter.action_type.as_deref(), Some("deploy"));
        assert_eq!(filter.limit, Some(5));
    }
}
