//! Domain models and repository traits for the continuity engine.
//!
//! This crate has no I/O. Storage lives in `continuity-infrastructure`, and
//! the coordinating components live in `continuity-application`.

pub mod action;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod session;

pub use error::{ContinuityError, Result};
