//! Session-gated, best-effort chat persistence.

use crate::error::PersistenceError;
use crate::session::Session;
use crate::state::ConversationState;
use crate::types::ChatSnapshot;
use async_trait::async_trait;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{debug, warn};

/// External key-value chat store: idempotent upsert per chat id.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get(&self, chat_id: &str) -> Result<Option<ChatSnapshot>, PersistenceError>;
    async fn put(&self, snapshot: &ChatSnapshot) -> Result<(), PersistenceError>;
}

/// Derive a chat title from its first message, truncated by characters.
pub fn derive_title(state: &ConversationState, max_chars: usize) -> String {
    state
        .messages
        .first()
        .map(|m| m.content.as_text().chars().take(max_chars).collect())
        .unwrap_or_default()
}

/// Writes finalized turns to the chat store.
///
/// Failures are logged and swallowed: the turn the user already saw is
/// never rolled back, and the write is independently retryable.
pub struct PersistenceGate {
    store: std::sync::Arc<dyn ChatStore>,
    title_max_chars: usize,
    deadline: Duration,
}

impl PersistenceGate {
    pub fn new(
        store: std::sync::Arc<dyn ChatStore>,
        title_max_chars: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            title_max_chars,
            deadline,
        }
    }

    pub fn snapshot(&self, session: &Session, state: &ConversationState) -> ChatSnapshot {
        ChatSnapshot {
            id: state.chat_id.clone(),
            title: derive_title(state, self.title_max_chars),
            user_id: session.user_id.clone(),
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            messages: state.messages.clone(),
            path: format!("/chat/{}", state.chat_id),
        }
    }

    /// Fetch a stored snapshot. Best-effort like `persist`: failures
    /// and timeouts are logged and read as an absent chat.
    pub async fn fetch(&self, chat_id: &str) -> Option<ChatSnapshot> {
        let result = match timeout(self.deadline, self.store.get(chat_id)).await {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::Timeout),
        };
        match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(chat_id, error = %e, "chat fetch failed");
                None
            }
        }
    }

    /// Persist the chat snapshot, best-effort.
    pub async fn persist(&self, session: &Session, state: &ConversationState) {
        let snapshot = self.snapshot(session, state);
        let result = match timeout(self.deadline, self.store.put(&snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::Timeout),
        };
        match result {
            Ok(()) => debug!(chat_id = %snapshot.id, "chat persisted"),
            Err(e) => warn!(chat_id = %snapshot.id, error = %e, "chat persistence failed"),
        }
    }
}

/// In-memory [`ChatStore`], for local runs and tests.
#[derive(Default)]
pub struct MemoryChatStore {
    chats: std::sync::Mutex<std::collections::HashMap<String, ChatSnapshot>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get(&self, chat_id: &str) -> Result<Option<ChatSnapshot>, PersistenceError> {
        Ok(self
            .chats
            .lock()
            .expect("chat store poisoned")
            .get(chat_id)
            .cloned())
    }

    async fn put(&self, snapshot: &ChatSnapshot) -> Result<(), PersistenceError> {
        self.chats
            .lock()
            .expect("chat store poisoned")
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }
}
