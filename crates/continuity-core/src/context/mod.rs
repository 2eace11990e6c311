//! Session context domain module.

mod model;
mod repository;

pub use model::{
    from_snapshot, to_snapshot, ContextChange, ContextEntry, ContextSnapshot, SavedSnapshot,
    SnapshotId, DEFAULT_NAMESPACE,
};
pub use repository::ContextRepository;
