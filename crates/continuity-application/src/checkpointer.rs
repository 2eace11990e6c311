//! Background heartbeat for long-running sessions.

use crate::orchestrator::Orchestrator;
use continuity_core::session::SessionId;
use continuity_core::Result;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Periodically refreshes a session's lock marker, and optionally backs up
/// the database, on a dedicated thread.
///
/// The thread exits once the session is no longer owned by this process.
/// Dropping the checkpointer stops it.
pub struct Checkpointer {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Checkpointer {
    pub fn spawn(
        orchestrator: Arc<Orchestrator>,
        session_id: impl Into<SessionId>,
        interval: Duration,
        with_backup: bool,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(format!("continuity-checkpoint-{}", session_id))
            .spawn(move || {
                tracing::debug!(
                    "Checkpointer started for {} ({:?} interval)",
                    session_id,
                    interval
                );
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if let Err(e) = orchestrator.heartbeat(&session_id) {
                        if e.is_state() || e.is_concurrency() || e.is_not_found() {
                            tracing::info!("Checkpointer for {} stopping: {}", session_id, e);
                            break;
                        }
                        tracing::warn!("Heartbeat for {} failed: {}", session_id, e);
                        continue;
                    }
                    if with_backup {
                        if let Err(e) = orchestrator.backup(None) {
                            tracing::warn!("Periodic backup failed: {}", e);
                        }
                    }
                }
                tracing::debug!("Checkpointer for {} stopped", session_id);
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Whether the background thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Checkpointer thread panicked");
            }
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuity_infrastructure::{ContinuityPaths, LockMarkerFile, MarkerState};
    use tempfile::TempDir;

    fn refreshed_at(paths: &ContinuityPaths) -> chrono::DateTime<chrono::Utc> {
        match LockMarkerFile::new(paths.lock_file()).inspect().unwrap() {
            MarkerState::Held(marker) => marker.refreshed_at,
            other => panic!("unexpected marker state {:?}", other),
        }
    }

    #[test]
    fn test_ticks_refresh_marker_and_back_up() {
        let temp = TempDir::new().unwrap();
        let paths = ContinuityPaths::at(temp.path());
        let orchestrator = Arc::new(Orchestrator::open(paths.clone()).unwrap());
        let session = orchestrator.start().unwrap();
        let before = refreshed_at(&paths);

        let checkpointer = Checkpointer::spawn(
            orchestrator.clone(),
            session.clone(),
            Duration::from_millis(10),
            true,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(120));
        checkpointer.stop();

        assert!(refreshed_at(&paths) > before);
        assert!(std::fs::read_dir(paths.backups_dir()).unwrap().count() >= 1);
        orchestrator.end(&session, None).unwrap();
    }

    #[test]
    fn test_exits_after_session_ends() {
        let temp = TempDir::new().unwrap();
        let orchestrator = Arc::new(Orchestrator::open(ContinuityPaths::at(temp.path())).unwrap());
        let session = orchestrator.start().unwrap();
        let checkpointer = Checkpointer::spawn(
            orchestrator.clone(),
            session.clone(),
            Duration::from_millis(5),
            false,
        )
        .unwrap();

        orchestrator.end(&session, None).unwrap();
        for _ in 0..200 {
            if checkpointer.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(checkpointer.is_finished());
    }
}
