//! Write-ahead ledger of actions.
//!
//! Every action is recorded as pending before its work runs, so a crash in
//! the middle of the work leaves a durable trace that recovery can classify.

use crate::config_registry::ConfigRegistry;
use continuity_core::action::{
    Action, ActionFilter, ActionId, ActionRepository, ActionStats, ActionStatus, RETRY_OF_PARAM,
};
use continuity_core::clock;
use continuity_core::config::keys;
use continuity_core::{ContinuityError, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Failure of [`ActionLedger::execute_tracked`].
#[derive(Error, Debug)]
pub enum TrackedError {
    /// The ledger could not record the action; the work may not have run.
    #[error("Action ledger error: {0}")]
    Ledger(#[from] ContinuityError),

    /// The work failed and the failure was recorded.
    #[error("Action '{action_id}' failed: {source}")]
    Work {
        action_id: ActionId,
        source: anyhow::Error,
    },

    /// The work failed and recording the failure failed too.
    #[error("Action '{action_id}' failed ({source}); recording it failed: {record_error}")]
    Unrecorded {
        action_id: ActionId,
        source: anyhow::Error,
        record_error: ContinuityError,
    },
}

impl TrackedError {
    /// The recorded action, if one was created.
    pub fn action_id(&self) -> Option<&str> {
        match self {
            TrackedError::Ledger(_) => None,
            TrackedError::Work { action_id, .. } | TrackedError::Unrecorded { action_id, .. } => {
                Some(action_id)
            }
        }
    }

    /// The error returned by the work itself, if the work ran and failed.
    pub fn work_error(&self) -> Option<&anyhow::Error> {
        match self {
            TrackedError::Ledger(_) => None,
            TrackedError::Work { source, .. } | TrackedError::Unrecorded { source, .. } => {
                Some(source)
            }
        }
    }
}

/// Error info stored on a failed action.
pub fn error_info(err: &anyhow::Error) -> Value {
    let chain: Vec<String> = err.chain().skip(1).map(|cause| cause.to_string()).collect();
    json!({
        "error": err.to_string(),
        "chain": chain,
    })
}

pub struct ActionLedger {
    repo: Arc<dyn ActionRepository>,
    config: Arc<ConfigRegistry>,
}

impl ActionLedger {
    pub fn new(repo: Arc<dyn ActionRepository>, config: Arc<ConfigRegistry>) -> Self {
        Self { repo, config }
    }

    fn max_actions(&self) -> Result<Option<u64>> {
        let max = self.config.get_i64(keys::MAX_ACTIONS_PER_SESSION, 0)?;
        Ok((max > 0).then_some(max as u64))
    }

    /// Durably records a pending action before any work happens.
    pub fn record_intent(
        &self,
        session_id: &str,
        action_type: &str,
        params: Value,
    ) -> Result<ActionId> {
        let action = Action::pending(session_id, action_type, params, clock::now());
        self.repo.insert_pending(&action, self.max_actions()?)?;
        tracing::debug!("Recorded intent {} ({}) in {}", action.id, action_type, session_id);
        Ok(action.id)
    }

    pub fn complete(&self, action_id: &str, result: Value) -> Result<Action> {
        let action = self.repo.transition(
            action_id,
            ActionStatus::Completed,
            Some(&result),
            clock::now(),
        )?;
        tracing::debug!("Completed action {} ({})", action_id, action.action_type);
        Ok(action)
    }

    pub fn fail(&self, action_id: &str, error_info: Value) -> Result<Action> {
        let action =
            self.repo
                .transition(action_id, ActionStatus::Failed, Some(&error_info), clock::now())?;
        tracing::warn!("Action {} ({}) failed", action_id, action.action_type);
        Ok(action)
    }

    /// Fails a pending action with a cancellation marker.
    pub fn cancel(&self, action_id: &str, reason: &str) -> Result<Action> {
        self.fail(
            action_id,
            json!({
                "error": format!("cancelled: {}", reason),
                "cancelled": true,
            }),
        )
    }

    /// Records intent, runs `work`, then records its outcome.
    ///
    /// The work's error is returned only after the failure is durable. A
    /// successful result that cannot be serialized is recorded as a failure.
    pub fn execute_tracked<T, F>(
        &self,
        session_id: &str,
        action_type: &str,
        params: Value,
        work: F,
    ) -> std::result::Result<(T, ActionId), TrackedError>
    where
        T: Serialize,
        F: FnOnce(&Value) -> anyhow::Result<T>,
    {
        let action_id = self.record_intent(session_id, action_type, params.clone())?;

        match work(&params) {
            Ok(output) => match serde_json::to_value(&output) {
                Ok(result) => {
                    self.complete(&action_id, result)?;
                    Ok((output, action_id))
                }
                Err(e) => {
                    let err = anyhow::Error::new(e).context("result is not serializable");
                    self.fail(&action_id, error_info(&err))?;
                    Err(TrackedError::Work {
                        action_id,
                        source: err,
                    })
                }
            },
            Err(source) => match self.fail(&action_id, error_info(&source)) {
                Ok(_) => Err(TrackedError::Work { action_id, source }),
                Err(record_error) => {
                    tracing::error!(
                        "Could not record failure of action {}: {}",
                        action_id,
                        record_error
                    );
                    Err(TrackedError::Unrecorded {
                        action_id,
                        source,
                        record_error,
                    })
                }
            },
        }
    }

    pub fn action(&self, action_id: &str) -> Result<Action> {
        self.repo
            .find_by_id(action_id)?
            .ok_or_else(|| ContinuityError::not_found("action", action_id))
    }

    /// Actions of a session, newest first. Always read fresh from the store.
    pub fn list_actions(&self, session_id: &str, filter: &ActionFilter) -> Result<Vec<Action>> {
        self.repo.list(session_id, filter)
    }

    /// Pending actions of a session, oldest first.
    pub fn pending_actions(&self, session_id: &str) -> Result<Vec<Action>> {
        let mut pending = self
            .repo
            .list(session_id, &ActionFilter::new().with_status(ActionStatus::Pending))?;
        pending.reverse();
        Ok(pending)
    }

    /// Records a new pending action in `session_id` repeating a failed or
    /// interrupted one, possibly from an earlier session.
    pub fn retry(&self, session_id: &str, action_id: &str) -> Result<ActionId> {
        let original = self.action(action_id)?;
        if !original.status.is_retryable() {
            return Err(ContinuityError::state(format!(
                "action '{}' is {} and cannot be retried",
                action_id, original.status
            )));
        }

        let mut params = match original.params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("params".to_string(), other);
                map
            }
        };
        params.insert(RETRY_OF_PARAM.to_string(), Value::String(original.id.clone()));

        let retry_id =
            self.record_intent(session_id, &original.action_type, Value::Object(params))?;
        tracing::info!("Retrying action {} as {}", original.id, retry_id);
        Ok(retry_id)
    }

    pub fn stats(&self, session_id: &str) -> Result<ActionStats> {
        self.repo.stats(session_id)
    }
}
