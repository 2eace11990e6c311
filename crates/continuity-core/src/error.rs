//! Error types for the continuity engine.

use thiserror::Error;

/// The shared error type for every continuity component.
///
/// Each variant is one class of the error taxonomy. Storage errors are fatal
/// to the current operation only; the store stays usable for later calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContinuityError {
    /// I/O, SQLite, or corruption of persisted data.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// The lock marker is held by another live process.
    #[error("Session '{session_id}' is held by live process {process_id}")]
    Concurrency { session_id: String, process_id: u32 },

    /// Invalid state transition or usage, e.g. acting without an active session.
    #[error("Invalid state: {0}")]
    State(String),

    /// Entity not found with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Configuration value does not match its declared type.
    #[error("Type mismatch for '{key}': expected {expected}, got {found}")]
    Type {
        key: String,
        expected: String,
        found: String,
    },
}

impl ContinuityError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a State error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a Concurrency error naming the current lock owner
    pub fn concurrency(session_id: impl Into<String>, process_id: u32) -> Self {
        Self::Concurrency {
            session_id: session_id.into(),
            process_id,
        }
    }

    /// Creates a Type error
    pub fn type_mismatch(
        key: impl Into<String>,
        expected: impl std::fmt::Display,
        found: impl Into<String>,
    ) -> Self {
        Self::Type {
            key: key.into(),
            expected: expected.to_string(),
            found: found.into(),
        }
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_type(&self) -> bool {
        matches!(self, Self::Type { .. })
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for ContinuityError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for ContinuityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage {
            message: format!("JSON: {}", err),
        }
    }
}

impl From<toml::de::Error> for ContinuityError {
    fn from(err: toml::de::Error) -> Self {
        Self::Storage {
            message: format!("TOML: {}", err),
        }
    }
}

impl From<toml::ser::Error> for ContinuityError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Storage {
            message: format!("TOML: {}", err),
        }
    }
}

/// A type alias for `Result<T, ContinuityError>`.
pub type Result<T> = std::result::Result<T, ContinuityError>;
