//! Action ledger domain module.

mod model;
mod repository;

pub use model::{Action, ActionFilter, ActionId, ActionStats, ActionStatus, RETRY_OF_PARAM};
pub use repository::ActionRepository;
