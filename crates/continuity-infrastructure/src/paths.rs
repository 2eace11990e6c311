//! Data directory layout.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.local/share/continuity/     # Data directory (or $CONTINUITY_HOME)
//! ├── continuity.db              # SQLite store
//! ├── session.lock               # Lock marker (TOML)
//! ├── session.lock.guard         # fs2 guard serialising marker updates
//! ├── backups/                   # Rotated database backups
//! └── exports/                   # Configuration exports
//! ```

use continuity_core::{ContinuityError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "CONTINUITY_HOME";

const APP_DIR: &str = "continuity";

/// Resolved file locations for one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuityPaths {
    root: PathBuf,
}

impl ContinuityPaths {
    /// Resolves the data directory from `CONTINUITY_HOME`, falling back to the
    /// platform's local data directory.
    pub fn resolve() -> Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::at(PathBuf::from(home)));
        }
        dirs::data_local_dir()
            .map(|dir| Self::at(dir.join(APP_DIR)))
            .ok_or_else(|| ContinuityError::storage("Cannot determine local data directory"))
    }

    /// Uses `root` as the data directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_file(&self) -> PathBuf {
        self.root.join("continuity.db")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("session.lock")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    /// Creates the data, backup and export directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.backups_dir(), self.exports_dir()] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
