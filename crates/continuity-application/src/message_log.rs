use crate::config_registry::ConfigRegistry;
use continuity_core::clock;
use continuity_core::config::keys;
use continuity_core::session::{Message, MessageId, MessageRepository};
use continuity_core::Result;
use std::sync::Arc;

/// Append-only conversation log of a session.
pub struct MessageLog {
    repo: Arc<dyn MessageRepository>,
    config: Arc<ConfigRegistry>,
}

impl MessageLog {
    pub fn new(repo: Arc<dyn MessageRepository>, config: Arc<ConfigRegistry>) -> Self {
        Self { repo, config }
    }

    /// Appends a message, honouring `MAX_MESSAGES_PER_SESSION` (non-positive means unlimited).
    pub fn record(&self, session_id: &str, source: &str, content: &str) -> Result<MessageId> {
        let max = self.config.get_i64(keys::MAX_MESSAGES_PER_SESSION, 0)?;
        let message = Message::new(session_id, source, content, clock::now());
        self.repo
            .append(&message, (max > 0).then_some(max as u64))?;
        tracing::trace!("Recorded message {} from {} in {}", message.id, source, session_id);
        Ok(message.id)
    }

    /// Up to `limit` messages, oldest first.
    pub fn messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.repo.list(session_id, limit)
    }

    pub fn count(&self, session_id: &str) -> Result<u64> {
        self.repo.count(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StateCache;
    use continuity_core::session::{Session, SessionRepository};
    use continuity_infrastructure::{
        Database, SqliteConfigRepository, SqliteMessageRepository, SqliteSessionRepository,
    };
    use serde_json::json;

    #[test]
    fn test_record_respects_configured_limit() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sessions = SqliteSessionRepository::new(db.clone());
        let session = Session::start(1, clock::now());
        sessions.insert(&session).unwrap();

        let config = Arc::new(ConfigRegistry::new(
            Arc::new(SqliteConfigRepository::new(db.clone())),
            Arc::new(StateCache::new()),
        ));
        config.seed_defaults().unwrap();
        config
            .set(keys::MAX_MESSAGES_PER_SESSION, json!(2), None, None)
            .unwrap();
        let log = MessageLog::new(Arc::new(SqliteMessageRepository::new(db)), config);

        log.record(&session.id, "user", "hello").unwrap();
        log.record(&session.id, "assistant", "hi").unwrap();
        assert!(log.record(&session.id, "user", "again").unwrap_err().is_state());

        let messages = log.messages(&session.id, 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(log.count(&session.id).unwrap(), 2);
    }
}
