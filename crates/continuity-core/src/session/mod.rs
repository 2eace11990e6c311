//! Session domain module.
//!
//! - `model`: Session lifecycle model (`Session`, `SessionStatus`, `SessionInfo`)
//! - `message`: Conversation messages (`Message`)
//! - `repository`: Repository traits for session and message persistence

mod message;
mod model;
mod repository;

pub use message::{Message, MessageId};
pub use model::{new_session_id, Session, SessionId, SessionInfo, SessionStatus};
pub use repository::{MessageRepository, SessionRepository};
