//! Global configuration domain module.
//!
//! - `model`: Typed entries and value encoding (`ConfigEntry`, `ConfigType`)
//! - `keys`: Well-known keys and their seeded defaults
//! - `repository`: Repository trait for configuration persistence

pub mod keys;
mod model;
mod repository;

pub use model::{value_kind, ConfigEntry, ConfigType};
pub use repository::ConfigRepository;
