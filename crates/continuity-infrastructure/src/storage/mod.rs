//! Storage layer: SQLite store, schema migrations and atomic TOML files.

mod atomic_toml;
mod database;
pub mod schema;
pub mod sqlite_ext;

pub use atomic_toml::{AtomicTomlFile, FileGuard};
pub use database::Database;
pub use sqlite_ext::SqliteResultExt;
