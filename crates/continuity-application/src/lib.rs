//! Application layer for the continuity engine.
//!
//! Components coordinate the domain models of `continuity-core` over the
//! storage of `continuity-infrastructure`. [`Orchestrator`] wires them
//! together over one data directory and is the usual entry point:
//!
//! ```no_run
//! use continuity_application::Orchestrator;
//! use serde_json::json;
//!
//! # fn main() -> continuity_core::Result<()> {
//! let orchestrator = Orchestrator::open_default()?;
//! if let Some(report) = orchestrator.detect_crash()? {
//!     println!("recovered {} crashed sessions", report.crashed_sessions.len());
//! }
//! let session = orchestrator.start()?;
//! orchestrator.set_context(&session, "build", "target", json!("release"))?;
//! orchestrator.end(&session, Some("done"))?;
//! # Ok(())
//! # }
//! ```

pub mod action_ledger;
pub mod backup;
pub mod cache;
pub mod checkpointer;
pub mod config_registry;
pub mod context_store;
pub mod logging;
pub mod message_log;
pub mod orchestrator;
pub mod session_coordinator;

pub use action_ledger::{ActionLedger, TrackedError};
pub use cache::{NamespaceValues, StateCache};
pub use checkpointer::Checkpointer;
pub use config_registry::ConfigRegistry;
pub use context_store::ContextStore;
pub use message_log::MessageLog;
pub use orchestrator::{Orchestrator, RuntimeOptions};
pub use session_coordinator::{CoordinatorParts, CrashReport, SessionCoordinator};
