//! Single entry point wiring every component over one data directory.

use crate::action_ledger::{ActionLedger, TrackedError};
use crate::backup::{backup_file_name, rotate_backups};
use crate::cache::{NamespaceValues, StateCache};
use crate::config_registry::ConfigRegistry;
use crate::context_store::ContextStore;
use crate::message_log::MessageLog;
use crate::session_coordinator::{CoordinatorParts, CrashReport, SessionCoordinator};
use continuity_core::action::{Action, ActionFilter, ActionId, ActionRepository, ActionStats};
use continuity_core::clock;
use continuity_core::config::keys;
use continuity_core::context::{
    ContextChange, ContextRepository, ContextSnapshot, SavedSnapshot, SnapshotId,
};
use continuity_core::lock::ProcessProbe;
use continuity_core::session::{
    Message, MessageId, MessageRepository, Session, SessionId, SessionInfo, SessionRepository,
};
use continuity_core::{ContinuityError, Result};
use continuity_infrastructure::{
    ContinuityPaths, Database, LockMarkerFile, SqliteActionRepository, SqliteConfigRepository,
    SqliteContextRepository, SqliteMessageRepository, SqliteSessionRepository,
    SystemProcessProbe,
};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Process identity used for lock ownership.
#[derive(Clone)]
pub struct RuntimeOptions {
    pub process_id: u32,
    pub probe: Arc<dyn ProcessProbe>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            process_id: std::process::id(),
            probe: Arc::new(SystemProcessProbe),
        }
    }
}

/// Façade over the session coordinator, ledger, context store, message log
/// and configuration registry.
///
/// Every mutation names its session explicitly and is rejected unless that
/// session is the active one owned by this process. Reads accept any
/// session. Dropping an orchestrator without [`Orchestrator::end`] leaves
/// its session to be classified as crashed by the next process.
///
/// Share one instance per data directory within a process. A second
/// instance over the same directory sees the first one's session as live
/// and cannot start its own until that session ends.
pub struct Orchestrator {
    paths: ContinuityPaths,
    db: Arc<Database>,
    coordinator: SessionCoordinator,
    ledger: ActionLedger,
    messages: MessageLog,
    context: ContextStore,
    config: Arc<ConfigRegistry>,
}

impl Orchestrator {
    /// Opens the data directory resolved from the environment.
    pub fn open_default() -> Result<Self> {
        Self::open(ContinuityPaths::resolve()?)
    }

    pub fn open(paths: ContinuityPaths) -> Result<Self> {
        Self::open_with(paths, RuntimeOptions::default())
    }

    /// Opens (creating and migrating as needed) the store under `paths`.
    pub fn open_with(paths: ContinuityPaths, options: RuntimeOptions) -> Result<Self> {
        paths.ensure_dirs()?;
        let db = Arc::new(Database::open(paths.database_file())?);
        let cache = Arc::new(StateCache::new());

        let config = Arc::new(ConfigRegistry::new(
            Arc::new(SqliteConfigRepository::new(db.clone())),
            cache.clone(),
        ));
        config.seed_defaults()?;

        let sessions: Arc<dyn SessionRepository> =
            Arc::new(SqliteSessionRepository::new(db.clone()));
        let messages: Arc<dyn MessageRepository> =
            Arc::new(SqliteMessageRepository::new(db.clone()));
        let actions: Arc<dyn ActionRepository> = Arc::new(SqliteActionRepository::new(db.clone()));
        let contexts: Arc<dyn ContextRepository> =
            Arc::new(SqliteContextRepository::new(db.clone()));

        let coordinator = SessionCoordinator::new(
            CoordinatorParts {
                sessions,
                messages: messages.clone(),
                actions: actions.clone(),
                marker: LockMarkerFile::new(paths.lock_file()),
                probe: options.probe,
                config: config.clone(),
            },
            options.process_id,
        );

        tracing::info!("Opened continuity store at {:?}", paths.root());
        Ok(Self {
            coordinator,
            ledger: ActionLedger::new(actions, config.clone()),
            messages: MessageLog::new(messages, config.clone()),
            context: ContextStore::new(contexts, cache),
            config,
            db,
            paths,
        })
    }

    pub fn paths(&self) -> &ContinuityPaths {
        &self.paths
    }

    pub fn config(&self) -> &ConfigRegistry {
        &self.config
    }

    pub fn process_id(&self) -> u32 {
        self.coordinator.process_id()
    }

    fn guard_session(&self, session_id: &str) -> Result<()> {
        self.coordinator.ensure_current(session_id)?;
        self.coordinator.touch(session_id)
    }

    fn owned_action(&self, session_id: &str, action_id: &str) -> Result<()> {
        self.guard_session(session_id)?;
        let action = self.ledger.action(action_id)?;
        if action.session_id != session_id {
            return Err(ContinuityError::state(format!(
                "action '{}' belongs to session '{}', not '{}'",
                action_id, action.session_id, session_id
            )));
        }
        Ok(())
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    pub fn start(&self) -> Result<SessionId> {
        let session_id = self.coordinator.start()?;
        self.context.pin(&session_id)?;
        Ok(session_id)
    }

    pub fn resume(&self, crashed_id: &str) -> Result<SessionId> {
        let session_id = self.coordinator.resume(crashed_id)?;
        self.context.pin(&session_id)?;
        Ok(session_id)
    }

    pub fn end(&self, session_id: &str, summary: Option<&str>) -> Result<Session> {
        let session = self.coordinator.end(session_id, summary)?;
        self.context.evict(session_id)?;
        Ok(session)
    }

    pub fn detect_crash(&self) -> Result<Option<CrashReport>> {
        self.coordinator.detect_crash()
    }

    pub fn heartbeat(&self, session_id: &str) -> Result<()> {
        self.coordinator.heartbeat(session_id)
    }

    pub fn current_session(&self) -> Result<Option<SessionId>> {
        self.coordinator.current_session()
    }

    // ============================================================================
    // Messages
    // ============================================================================

    pub fn record_message(
        &self,
        session_id: &str,
        source: &str,
        content: &str,
    ) -> Result<MessageId> {
        self.guard_session(session_id)?;
        self.messages.record(session_id, source, content)
    }

    pub fn session_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.messages.messages(session_id, limit)
    }

    // ============================================================================
    // Actions
    // ============================================================================

    pub fn record_intent(
        &self,
        session_id: &str,
        action_type: &str,
        params: Value,
    ) -> Result<ActionId> {
        self.guard_session(session_id)?;
        self.ledger.record_intent(session_id, action_type, params)
    }

    pub fn complete(&self, session_id: &str, action_id: &str, result: Value) -> Result<Action> {
        self.owned_action(session_id, action_id)?;
        self.ledger.complete(action_id, result)
    }

    pub fn fail(&self, session_id: &str, action_id: &str, error_info: Value) -> Result<Action> {
        self.owned_action(session_id, action_id)?;
        self.ledger.fail(action_id, error_info)
    }

    pub fn cancel(&self, session_id: &str, action_id: &str, reason: &str) -> Result<Action> {
        self.owned_action(session_id, action_id)?;
        self.ledger.cancel(action_id, reason)
    }

    /// Retries a failed or interrupted action, possibly from an earlier
    /// session, as a new pending action in `session_id`.
    pub fn retry(&self, session_id: &str, action_id: &str) -> Result<ActionId> {
        self.guard_session(session_id)?;
        self.ledger.retry(session_id, action_id)
    }

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
        self.guard_session(session_id)?;
        self.ledger
            .execute_tracked(session_id, action_type, params, work)
    }

    pub fn action(&self, action_id: &str) -> Result<Action> {
        self.ledger.action(action_id)
    }

    pub fn list_actions(&self, session_id: &str, filter: &ActionFilter) -> Result<Vec<Action>> {
        self.ledger.list_actions(session_id, filter)
    }

    pub fn pending_actions(&self, session_id: &str) -> Result<Vec<Action>> {
        self.ledger.pending_actions(session_id)
    }

    pub fn action_stats(&self, session_id: &str) -> Result<ActionStats> {
        self.ledger.stats(session_id)
    }

    // ============================================================================
    // Context
    // ============================================================================

    pub fn set_context(
        &self,
        session_id: &str,
        namespace: &str,
        key: &str,
        value: Value,
    ) -> Result<()> {
        self.guard_session(session_id)?;
        self.context.set(session_id, namespace, key, value)
    }

    pub fn clear_context(&self, session_id: &str, namespace: &str, key: &str) -> Result<bool> {
        self.guard_session(session_id)?;
        self.context.clear(session_id, namespace, key)
    }

    pub fn clear_namespace(&self, session_id: &str, namespace: &str) -> Result<usize> {
        self.guard_session(session_id)?;
        self.context.clear_namespace(session_id, namespace)
    }

    pub fn merge_context(
        &self,
        session_id: &str,
        namespace: &str,
        values: NamespaceValues,
    ) -> Result<()> {
        self.guard_session(session_id)?;
        self.context.merge(session_id, namespace, values)
    }

    pub fn import_context(&self, session_id: &str, snapshot: &ContextSnapshot) -> Result<usize> {
        self.guard_session(session_id)?;
        self.context.import(session_id, snapshot)
    }

    /// Copies context from any session into the active session `to`.
    pub fn transfer_context(
        &self,
        from: &str,
        to: &str,
        namespace: Option<&str>,
    ) -> Result<usize> {
        self.guard_session(to)?;
        self.context.transfer(from, to, namespace)
    }

    pub fn get_context(
        &self,
        session_id: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Value>> {
        self.context.get(session_id, namespace, key)
    }

    pub fn get_namespace(&self, session_id: &str, namespace: &str) -> Result<NamespaceValues> {
        self.context.get_namespace(session_id, namespace)
    }

    pub fn context_keys(
        &self,
        session_id: &str,
        namespace: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>> {
        self.context.keys(session_id, namespace, prefix)
    }

    pub fn context_namespaces(&self, session_id: &str) -> Result<Vec<String>> {
        self.context.namespaces(session_id)
    }

    pub fn context_size(&self, session_id: &str) -> Result<usize> {
        self.context.size_bytes(session_id)
    }

    pub fn export_context(&self, session_id: &str) -> Result<ContextSnapshot> {
        self.context.export(session_id)
    }

    /// Past values of one key, newest first; `None` marks a removal.
    pub fn context_history(
        &self,
        session_id: &str,
        namespace: &str,
        key: &str,
        limit: usize,
    ) -> Result<Vec<ContextChange>> {
        self.context.history(session_id, namespace, key, limit)
    }

    pub fn save_context_snapshot(&self, session_id: &str) -> Result<SnapshotId> {
        self.guard_session(session_id)?;
        self.context.save_snapshot(session_id)
    }

    pub fn context_snapshots(&self, session_id: &str, limit: usize) -> Result<Vec<SavedSnapshot>> {
        self.context.snapshots(session_id, limit)
    }

    pub fn context_snapshot(&self, snapshot_id: &str) -> Result<SavedSnapshot> {
        self.context.snapshot(snapshot_id)
    }

    /// Replaces the active session's context with a snapshot saved by any session.
    pub fn restore_context_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<usize> {
        self.guard_session(session_id)?;
        self.context.restore_snapshot(session_id, snapshot_id)
    }

    // ============================================================================
    // Sessions
    // ============================================================================

    pub fn session(&self, session_id: &str) -> Result<Session> {
        self.coordinator.session(session_id)
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionInfo> {
        self.coordinator.session_info(session_id)
    }

    pub fn session_history(&self, limit: usize) -> Result<Vec<Session>> {
        self.coordinator.session_history(limit)
    }

    pub fn crashed_sessions(&self) -> Result<Vec<Session>> {
        self.coordinator.crashed_sessions()
    }

    // ============================================================================
    // Backup
    // ============================================================================

    /// Copies the database to `dest`, or to a timestamped file in the backup
    /// directory. Default-location backups are rotated down to
    /// `STATE_BACKUP_COUNT` (non-positive keeps every backup).
    pub fn backup(&self, dest: Option<&Path>) -> Result<PathBuf> {
        if let Some(dest) = dest {
            self.db.backup_to(dest)?;
            return Ok(dest.to_path_buf());
        }

        let dir = self.paths.backups_dir();
        let path = dir.join(backup_file_name(clock::now()));
        self.db.backup_to(&path)?;

        let keep = self.config.get_i64(keys::STATE_BACKUP_COUNT, 5)?;
        if keep > 0 {
            let removed = rotate_backups(&dir, keep as usize)?;
            if !removed.is_empty() {
                tracing::info!("Removed {} old backups", removed.len());
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuity_core::session::SessionStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(temp: &TempDir) -> Orchestrator {
        Orchestrator::open(ContinuityPaths::at(temp.path())).unwrap()
    }

    #[test]
    fn test_open_seeds_defaults_and_layout() {
        let temp = TempDir::new().unwrap();
        let orchestrator = open(&temp);
        assert!(temp.path().join("continuity.db").exists());
        assert!(temp.path().join("backups").is_dir());
        assert_eq!(
            orchestrator
                .config()
                .get_i64(keys::SESSION_TIMEOUT_MINUTES, 0)
                .unwrap(),
            60
        );
        assert_eq!(orchestrator.process_id(), std::process::id());
    }

    #[test]
    fn test_mutations_require_owned_session() {
        let temp = TempDir::new().unwrap();
        let orchestrator = open(&temp);
        assert!(orchestrator
            .set_context("nope", "ns", "k", json!(1))
            .unwrap_err()
            .is_state());

        let s = orchestrator.start().unwrap();
        orchestrator.set_context(&s, "ns", "k", json!(1)).unwrap();
        orchestrator.record_message(&s, "user", "hi").unwrap();
        orchestrator.end(&s, None).unwrap();

        assert!(orchestrator.record_intent(&s, "Build", Value::Null).unwrap_err().is_state());
        assert!(orchestrator.record_message(&s, "user", "late").unwrap_err().is_state());
        // Reads of finished sessions still work.
        assert_eq!(orchestrator.get_context(&s, "ns", "k").unwrap(), Some(json!(1)));
        assert_eq!(orchestrator.session_messages(&s, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_action_must_belong_to_session() {
        let temp = TempDir::new().unwrap();
        let orchestrator = open(&temp);
        let first = orchestrator.start().unwrap();
        let action = orchestrator.record_intent(&first, "Build", Value::Null).unwrap();
        orchestrator.end(&first, None).unwrap();

        let second = orchestrator.start().unwrap();
        assert!(orchestrator
            .complete(&second, &action, Value::Null)
            .unwrap_err()
            .is_state());
    }

    #[test]
    fn test_context_history_and_snapshots_outlive_the_session() {
        let temp = TempDir::new().unwrap();
        let orchestrator = open(&temp);
        let first = orchestrator.start().unwrap();
        orchestrator.set_context(&first, "build", "jobs", json!(2)).unwrap();
        let snapshot = orchestrator.save_context_snapshot(&first).unwrap();
        orchestrator.set_context(&first, "build", "jobs", json!(8)).unwrap();
        orchestrator.end(&first, None).unwrap();

        let history = orchestrator.context_history(&first, "build", "jobs", 10).unwrap();
        assert_eq!(
            history.iter().map(|c| c.value.clone()).collect::<Vec<_>>(),
            vec![Some(json!(8)), Some(json!(2))]
        );
        assert!(orchestrator.save_context_snapshot(&first).unwrap_err().is_state());
        assert_eq!(orchestrator.context_snapshots(&first, 10).unwrap().len(), 1);

        let second = orchestrator.start().unwrap();
        assert_eq!(orchestrator.restore_context_snapshot(&second, &snapshot).unwrap(), 1);
        assert_eq!(orchestrator.get_context(&second, "build", "jobs").unwrap(), Some(json!(2)));
        assert_eq!(
            orchestrator.context_snapshot(&snapshot).unwrap().session_id,
            first
        );
    }

    #[test]
    fn test_reads_of_finished_sessions_are_not_cached() {
        let temp = TempDir::new().unwrap();
        let orchestrator = open(&temp);
        let mut finished = Vec::new();
        for i in 0..3 {
            let s = orchestrator.start().unwrap();
            orchestrator.set_context(&s, "ns", "k", json!(i)).unwrap();
            assert_eq!(orchestrator.get_context(&s, "ns", "k").unwrap(), Some(json!(i)));
            orchestrator.end(&s, None).unwrap();
            finished.push(s);
        }

        let current = orchestrator.start().unwrap();
        for (i, s) in finished.iter().enumerate() {
            assert_eq!(orchestrator.get_context(s, "ns", "k").unwrap(), Some(json!(i)));
        }
        orchestrator.set_context(&current, "ns", "k", json!("live")).unwrap();
        assert_eq!(orchestrator.get_context(&current, "ns", "k").unwrap(), Some(json!("live")));

        for s in &finished {
            assert!(!orchestrator.context.is_cached(s, "ns"));
        }
        assert!(orchestrator.context.is_cached(&current, "ns"));
    }

    #[test]
    fn test_second_instance_over_same_directory_leaves_first_session_alone() {
        let temp = TempDir::new().unwrap();
        let first = open(&temp);
        let s = first.start().unwrap();

        let second = open(&temp);
        assert!(second.start().unwrap_err().is_concurrency());
        assert!(second.detect_crash().unwrap().is_none());
        first.set_context(&s, "ns", "k", json!(1)).unwrap();

        first.end(&s, None).unwrap();
        let next = second.start().unwrap();
        assert!(second.session(&next).unwrap().is_active());
        assert_eq!(second.session(&s).unwrap().status, SessionStatus::Completed);
    }

    #[test]
    fn test_backup_to_explicit_path_and_rotation() {
        let temp = TempDir::new().unwrap();
        let orchestrator = open(&temp);
        orchestrator
            .config()
            .set(keys::STATE_BACKUP_COUNT, json!(2), None, None)
            .unwrap();

        let explicit = temp.path().join("manual").join("copy.db");
        assert_eq!(orchestrator.backup(Some(explicit.as_path())).unwrap(), explicit);
        assert!(explicit.exists());

        for _ in 0..3 {
            orchestrator.backup(None).unwrap();
        }
        let count = std::fs::read_dir(temp.path().join("backups"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|ext| ext == "db"))
            .count();
        assert_eq!(count, 2);
    }
}
