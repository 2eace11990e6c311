//! Storage and OS integration for the continuity engine.
//!
//! - `storage`: SQLite database, schema migrations, atomic TOML files
//! - `sqlite_*_repository`: repository trait implementations over [`Database`]
//! - `lock_marker`: the cross-process session marker file
//! - `process_probe`: OS process liveness via `sysinfo`
//! - `paths`: data directory layout

pub mod config_document;
pub mod lock_marker;
pub mod paths;
pub mod process_probe;
pub mod sqlite_action_repository;
pub mod sqlite_config_repository;
pub mod sqlite_context_repository;
pub mod sqlite_message_repository;
pub mod sqlite_session_repository;
pub mod storage;

pub use crate::lock_marker::{LockMarkerFile, MarkerState};
pub use crate::paths::ContinuityPaths;
pub use crate::process_probe::SystemProcessProbe;
pub use crate::sqlite_action_repository::SqliteActionRepository;
pub use crate::sqlite_config_repository::SqliteConfigRepository;
pub use crate::sqlite_context_repository::SqliteContextRepository;
pub use crate::sqlite_message_repository::SqliteMessageRepository;
pub use crate::sqlite_session_repository::SqliteSessionRepository;
pub use crate::storage::Database;
