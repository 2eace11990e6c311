//! Session lifecycle, ownership and crash detection.
//!
//! A session is owned by the process named in the on-disk lock marker. The
//! marker is only advisory: ownership is confirmed by probing the owner's
//! process and by the age of its last heartbeat. Every read-check-write of
//! the marker happens under its guard file so two processes never both take
//! ownership.

use crate::config_registry::ConfigRegistry;
use chrono::{DateTime, Duration, Utc};
use continuity_core::action::{ActionId, ActionRepository, ActionStatus};
use continuity_core::clock;
use continuity_core::config::keys;
use continuity_core::lock::{LockMarker, ProcessProbe};
use continuity_core::session::{
    MessageRepository, Session, SessionId, SessionInfo, SessionRepository, SessionStatus,
};
use continuity_core::{ContinuityError, Result};
use continuity_infrastructure::{LockMarkerFile, MarkerState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Minimum spacing between implicit marker refreshes from [`SessionCoordinator::touch`].
const TOUCH_INTERVAL_SECONDS: i64 = 60;

/// Sessions owned by live coordinators of this process, keyed by lock marker
/// path. Lets two coordinators over one data directory in the same process
/// tell a sibling's session from one left behind by a reused pid.
static IN_PROCESS_OWNERS: Mutex<BTreeSet<(PathBuf, SessionId)>> = Mutex::new(BTreeSet::new());

fn in_process_owners() -> MutexGuard<'static, BTreeSet<(PathBuf, SessionId)>> {
    IN_PROCESS_OWNERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn owner_key(marker_path: &Path, session_id: &str) -> (PathBuf, SessionId) {
    (marker_path.to_path_buf(), session_id.to_string())
}

/// Outcome of a crash detection pass that found something to recover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    /// Sessions marked crashed; the one named by the lock marker comes first.
    pub crashed_sessions: Vec<SessionId>,
    /// Pending actions of those sessions, now interrupted.
    pub interrupted_actions: Vec<ActionId>,
}

impl CrashReport {
    pub fn is_empty(&self) -> bool {
        self.crashed_sessions.is_empty()
    }

    fn absorb(&mut self, session_id: &str, interrupted: Vec<ActionId>) {
        self.crashed_sessions.push(session_id.to_string());
        self.interrupted_actions.extend(interrupted);
    }
}

struct Ownership {
    session_id: SessionId,
    refreshed_at: DateTime<Utc>,
}

/// Collaborators of a [`SessionCoordinator`].
pub struct CoordinatorParts {
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub actions: Arc<dyn ActionRepository>,
    pub marker: LockMarkerFile,
    pub probe: Arc<dyn ProcessProbe>,
    pub config: Arc<ConfigRegistry>,
}

pub struct SessionCoordinator {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    actions: Arc<dyn ActionRepository>,
    marker: LockMarkerFile,
    probe: Arc<dyn ProcessProbe>,
    config: Arc<ConfigRegistry>,
    process_id: u32,
    current: Mutex<Option<Ownership>>,
}

impl SessionCoordinator {
    pub fn new(parts: CoordinatorParts, process_id: u32) -> Self {
        Self {
            sessions: parts.sessions,
            messages: parts.messages,
            actions: parts.actions,
            marker: parts.marker,
            probe: parts.probe,
            config: parts.config,
            process_id,
            current: Mutex::new(None),
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    fn lock_current(&self) -> Result<MutexGuard<'_, Option<Ownership>>> {
        self.current
            .lock()
            .map_err(|_| ContinuityError::state("session ownership mutex poisoned"))
    }

    fn take_ownership(
        &self,
        current: &mut Option<Ownership>,
        session_id: &str,
        now: DateTime<Utc>,
    ) {
        in_process_owners().insert(owner_key(self.marker.path(), session_id));
        *current = Some(Ownership {
            session_id: session_id.to_string(),
            refreshed_at: now,
        });
    }

    fn release_ownership(&self, current: &mut Option<Ownership>) {
        if let Some(owned) = current.take() {
            in_process_owners().remove(&owner_key(self.marker.path(), &owned.session_id));
        }
    }

    /// Whether any coordinator of this process over the same marker owns `session_id`.
    fn owned_in_process(&self, session_id: &str) -> bool {
        in_process_owners().contains(&owner_key(self.marker.path(), session_id))
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Starts a new session owned by this process.
    pub fn start(&self) -> Result<SessionId> {
        self.open_session(None)
    }

    /// Starts a new session that continues the crashed session `crashed_id`,
    /// carrying its context forward.
    pub fn resume(&self, crashed_id: &str) -> Result<SessionId> {
        self.open_session(Some(crashed_id))
    }

    fn open_session(&self, resumed_from: Option<&str>) -> Result<SessionId> {
        let _guard = self.marker.guard()?;
        let mut current = self.lock_current()?;

        if let Some(owned) = current.as_ref() {
            match self.sessions.find_by_id(&owned.session_id)? {
                Some(session) if session.is_active() => {
                    return Err(ContinuityError::state(format!(
                        "session '{}' is already active in this process",
                        session.id
                    )));
                }
                _ => self.release_ownership(&mut current),
            }
        }

        let now = clock::now();
        let (_, live_owner) = self.detect_crash_locked(now, None)?;
        if let Some(owner) = live_owner {
            return Err(ContinuityError::concurrency(owner.session_id, owner.process_id));
        }

        let session = match resumed_from {
            Some(crashed_id) => {
                match self.sessions.find_by_id(crashed_id)? {
                    Some(source) if source.status == SessionStatus::Crashed => {}
                    _ => return Err(ContinuityError::not_found("crashed session", crashed_id)),
                }
                Session::resume_of(crashed_id, self.process_id, now)
            }
            None => Session::start(self.process_id, now),
        };

        self.marker
            .write(&LockMarker::new(&session.id, self.process_id, now))?;
        let inserted = match resumed_from {
            Some(_) => self.sessions.insert_resumed(&session),
            None => self.sessions.insert(&session).map(|_| 0),
        };
        let copied = match inserted {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(cleanup) = self.marker.remove() {
                    tracing::warn!("Failed to remove lock marker after aborted start: {}", cleanup);
                }
                return Err(e);
            }
        };

        self.take_ownership(&mut current, &session.id, now);
        match resumed_from {
            Some(crashed_id) => tracing::info!(
                "Resumed session {} as {} ({} context entries carried forward)",
                crashed_id,
                session.id,
                copied
            ),
            None => tracing::info!("Started session {} (pid {})", session.id, self.process_id),
        }
        Ok(session.id)
    }

    /// Ends the session owned by this process and releases the marker.
    pub fn end(&self, session_id: &str, summary: Option<&str>) -> Result<Session> {
        let _guard = self.marker.guard()?;
        let mut current = self.lock_current()?;

        let owned = current
            .as_ref()
            .is_some_and(|owned| owned.session_id == session_id);
        if !owned {
            let session = self.session(session_id)?;
            return Err(ContinuityError::state(format!(
                "session '{}' is {} and not owned by this process",
                session_id, session.status
            )));
        }

        let session = match self.sessions.finish(session_id, clock::now(), summary) {
            Ok(session) => session,
            Err(e) => {
                if e.is_state() {
                    self.release_ownership(&mut current);
                }
                return Err(e);
            }
        };

        if let MarkerState::Held(marker) = self.marker.inspect()? {
            if marker.is_owned_by(session_id, self.process_id) {
                self.marker.remove()?;
            }
        }
        self.release_ownership(&mut current);
        tracing::info!("Ended session {}", session_id);
        Ok(session)
    }

    /// Refreshes the marker heartbeat of the session owned by this process.
    pub fn heartbeat(&self, session_id: &str) -> Result<()> {
        let _guard = self.marker.guard()?;
        let mut current = self.lock_current()?;
        Self::check_owned(&current, session_id)?;

        if !self.session(session_id)?.is_active() {
            self.release_ownership(&mut current);
            return Err(ContinuityError::state(format!(
                "session '{}' is no longer active",
                session_id
            )));
        }

        let now = clock::now();
        match self.marker.inspect()? {
            MarkerState::Held(marker) if marker.is_owned_by(session_id, self.process_id) => {
                self.marker.write(&marker.refreshed(now))?;
            }
            MarkerState::Held(marker) => {
                return Err(ContinuityError::concurrency(
                    marker.session_id,
                    marker.process_id,
                ));
            }
            MarkerState::Absent | MarkerState::Corrupt => {
                tracing::warn!("Lock marker for session {} was missing; rewriting it", session_id);
                self.marker
                    .write(&LockMarker::new(session_id, self.process_id, now))?;
            }
        }

        if let Some(owned) = current.as_mut() {
            owned.refreshed_at = now;
        }
        tracing::trace!("Heartbeat for session {}", session_id);
        Ok(())
    }

    /// Heartbeat, at most once per minute. Called on every façade mutation.
    pub fn touch(&self, session_id: &str) -> Result<()> {
        let due = {
            let current = self.lock_current()?;
            current.as_ref().is_some_and(|owned| {
                owned.session_id == session_id
                    && clock::now() - owned.refreshed_at
                        >= Duration::seconds(TOUCH_INTERVAL_SECONDS)
            })
        };
        if due {
            self.heartbeat(session_id)?;
        }
        Ok(())
    }

    /// Fails with a state error unless `session_id` is the active session
    /// owned by this process.
    pub fn ensure_current(&self, session_id: &str) -> Result<()> {
        let current = self.lock_current()?;
        Self::check_owned(&current, session_id)
    }

    fn check_owned(current: &Option<Ownership>, session_id: &str) -> Result<()> {
        match current {
            Some(owned) if owned.session_id == session_id => Ok(()),
            _ => Err(ContinuityError::state(format!(
                "session '{}' is not the active session of this process",
                session_id
            ))),
        }
    }

    // ============================================================================
    // Crash detection
    // ============================================================================

    /// Classifies sessions left active by dead or silent processes as crashed
    /// and interrupts their pending actions.
    ///
    /// Returns `None` when nothing needed recovery.
    pub fn detect_crash(&self) -> Result<Option<CrashReport>> {
        let _guard = self.marker.guard()?;
        let current = self.lock_current()?;
        let owned = current.as_ref().map(|owned| owned.session_id.as_str());
        let (report, _) = self.detect_crash_locked(clock::now(), owned)?;
        Ok((!report.is_empty()).then_some(report))
    }

    /// Runs detection with the marker guard held. Returns the report and the
    /// marker of a live owner, if any.
    fn detect_crash_locked(
        &self,
        now: DateTime<Utc>,
        owned: Option<&str>,
    ) -> Result<(CrashReport, Option<LockMarker>)> {
        let mut report = CrashReport::default();
        let mut live_owner = None;

        match self.marker.inspect()? {
            MarkerState::Absent => {}
            MarkerState::Corrupt => {
                tracing::warn!("Removing unreadable lock marker");
                self.marker.remove()?;
            }
            MarkerState::Held(marker) => match self.sessions.find_by_id(&marker.session_id)? {
                Some(session) if session.is_active() => {
                    if self.owner_is_live(&marker, owned, now)? {
                        live_owner = Some(marker);
                    } else {
                        let interrupted = self.sessions.mark_crashed(&marker.session_id, now)?;
                        tracing::warn!(
                            "Session {} of pid {} crashed; {} pending actions interrupted",
                            marker.session_id,
                            marker.process_id,
                            interrupted.len()
                        );
                        report.absorb(&marker.session_id, interrupted);
                        self.marker.remove()?;
                    }
                }
                _ => {
                    tracing::debug!(
                        "Removing lock marker of inactive session {}",
                        marker.session_id
                    );
                    self.marker.remove()?;
                }
            },
        }

        // Active rows without a live marker have lost their owner.
        for session in self.sessions.list_by_status(SessionStatus::Active)? {
            let is_live = live_owner
                .as_ref()
                .is_some_and(|marker: &LockMarker| marker.session_id == session.id);
            let held = owned == Some(session.id.as_str()) || self.owned_in_process(&session.id);
            if is_live || held {
                continue;
            }
            let interrupted = self.sessions.mark_crashed(&session.id, now)?;
            tracing::warn!(
                "Session {} was left active without an owner; {} pending actions interrupted",
                session.id,
                interrupted.len()
            );
            report.absorb(&session.id, interrupted);
        }

        Ok((report, live_owner))
    }

    fn owner_is_live(
        &self,
        marker: &LockMarker,
        owned: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if marker.process_id == self.process_id {
            // A reused pid only counts while a coordinator of this process holds the session.
            return Ok(owned == Some(marker.session_id.as_str())
                || self.owned_in_process(&marker.session_id));
        }
        if !self.probe.is_alive(marker.process_id) {
            return Ok(false);
        }
        let stale_after = self.stale_after()?;
        if marker.is_stale(now, stale_after) {
            tracing::warn!(
                "Lock marker of session {} has not been refreshed for over {}s",
                marker.session_id,
                stale_after.num_seconds()
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// `CRASH_DETECTION_STALE_SECONDS`, falling back to the session timeout.
    fn stale_after(&self) -> Result<Duration> {
        let seconds = if self.config.get(keys::CRASH_DETECTION_STALE_SECONDS)?.is_some() {
            self.config.get_i64(keys::CRASH_DETECTION_STALE_SECONDS, 3600)?
        } else {
            self.config
                .get_i64(keys::SESSION_TIMEOUT_MINUTES, 60)?
                .saturating_mul(60)
        };
        Ok(Duration::try_seconds(seconds.max(0)).unwrap_or(Duration::MAX))
    }

    // ============================================================================
    // Reads
    // ============================================================================

    pub fn session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .find_by_id(session_id)?
            .ok_or_else(|| ContinuityError::not_found("session", session_id))
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionInfo> {
        let session = self.session(session_id)?;
        let stats = self.actions.stats(session_id)?;
        let resumed_into = self
            .sessions
            .list_resumed_from(session_id)?
            .into_iter()
            .map(|session| session.id)
            .collect();
        Ok(SessionInfo {
            message_count: self.messages.count(session_id)?,
            action_count: stats.total,
            pending_action_count: stats.count(ActionStatus::Pending),
            resumed_into,
            session,
        })
    }

    /// The most recent sessions, newest first.
    pub fn session_history(&self, limit: usize) -> Result<Vec<Session>> {
        self.sessions.list_recent(limit)
    }

    pub fn crashed_sessions(&self) -> Result<Vec<Session>> {
        self.sessions.list_by_status(SessionStatus::Crashed)
    }

    /// The session this process currently owns, if any.
    pub fn current_session(&self) -> Result<Option<SessionId>> {
        Ok(self
            .lock_current()?
            .as_ref()
            .map(|owned| owned.session_id.clone()))
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        let current = self.current.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(owned) = current.take() {
            in_process_owners().remove(&owner_key(self.marker.path(), &owned.session_id));
        }
    }
}
