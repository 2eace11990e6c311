//! The on-disk lock marker naming the session that owns the data directory.

use crate::storage::{AtomicTomlFile, FileGuard};
use continuity_core::lock::LockMarker;
use continuity_core::Result;
use std::path::{Path, PathBuf};

/// What was found at the marker location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    /// No marker: the previous owner shut down cleanly (or never existed).
    Absent,
    Held(LockMarker),
    /// A marker exists but could not be parsed, e.g. a torn write from an
    /// older build. Its owner is unknown.
    Corrupt,
}

/// TOML-backed lock marker with a sibling guard file.
///
/// The marker is advisory. Callers hold [`LockMarkerFile::guard`] across any
/// read-check-write sequence so that two processes never both conclude they
/// may take ownership.
pub struct LockMarkerFile {
    file: AtomicTomlFile<LockMarker>,
}

impl LockMarkerFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: AtomicTomlFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Acquires the cross-process guard, blocking until available.
    pub fn guard(&self) -> Result<FileGuard> {
        self.file.guard()
    }

    /// Reads the marker. I/O failures are errors; unparsable content is
    /// reported as [`MarkerState::Corrupt`].
    pub fn inspect(&self) -> Result<MarkerState> {
        let Some(content) = self.file.read_text()? else {
            return Ok(MarkerState::Absent);
        };
        match toml::from_str::<LockMarker>(&content) {
            Ok(marker) => Ok(MarkerState::Held(marker)),
            Err(e) => {
                tracing::warn!("Unreadable lock marker at {:?}: {}", self.path(), e);
                Ok(MarkerState::Corrupt)
            }
        }
    }

    pub fn write(&self, marker: &LockMarker) -> Result<()> {
        self.file.save(marker)?;
        tracing::debug!(
            "Wrote lock marker for session {} (pid {})",
            marker.session_id,
            marker.process_id
        );
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        self.file.remove()?;
        tracing::debug!("Removed lock marker {:?}", self.path());
        Ok(())
    }
}
