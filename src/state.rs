//! Conversation state store.
//!
//! The append-only source-of-truth log per chat. All reads and writes
//! are gated on an authenticated session: absent one they are silent
//! no-ops, not errors. Writes to a chat are serialized through a
//! per-chat async mutex, so the main turn and background actions never
//! interleave a read-modify-write; the revision counter makes any
//! missed update observable.

use crate::persist::PersistenceGate;
use crate::session::Session;
use crate::types::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Append-only message log for one chat.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationState {
    pub chat_id: String,
    pub messages: Vec<Message>,
    /// Bumped on every append; a cheap lost-update tripwire.
    pub revision: u64,
}

impl ConversationState {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            messages: Vec::new(),
            revision: 0,
        }
    }
}

type SharedState = Arc<tokio::sync::Mutex<ConversationState>>;

/// Per-chat serialized writer over in-memory conversation logs.
#[derive(Default)]
pub struct ConversationStore {
    chats: Mutex<HashMap<String, SharedState>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn chat(&self, chat_id: &str) -> SharedState {
        let mut chats = self.chats.lock().expect("conversation store poisoned");
        chats
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(ConversationState::new(chat_id))))
            .clone()
    }

    /// Snapshot of the current state. `None` without a session.
    pub async fn get_state(
        &self,
        session: Option<&Session>,
        chat_id: &str,
    ) -> Option<ConversationState> {
        session?;
        let chat = self.chat(chat_id);
        let state = chat.lock().await;
        Some(state.clone())
    }

    /// Append messages atomically, returning the new revision.
    /// Silent no-op without a session.
    pub async fn append(
        &self,
        session: Option<&Session>,
        chat_id: &str,
        messages: Vec<Message>,
    ) -> Option<u64> {
        if session.is_none() {
            debug!(chat_id, "append skipped: no session");
            return None;
        }
        let chat = self.chat(chat_id);
        let mut state = chat.lock().await;
        state.messages.extend(messages);
        state.revision += 1;
        Some(state.revision)
    }

    /// Replace a chat's log with a stored snapshot, for cold replay.
    /// Silent no-op without a session.
    pub async fn load(&self, session: Option<&Session>, chat_id: &str, messages: Vec<Message>) {
        if session.is_none() {
            return;
        }
        let chat = self.chat(chat_id);
        let mut state = chat.lock().await;
        state.messages = messages;
        state.revision += 1;
    }

    /// Finalize a turn: hand the full chat snapshot to the persistence
    /// gate. Gated on the session; persistence failures are the gate's
    /// concern and never roll back the in-memory log.
    pub async fn finalize(
        &self,
        session: Option<&Session>,
        chat_id: &str,
        gate: &PersistenceGate,
    ) {
        let Some(session) = session else {
            debug!(chat_id, "finalize skipped: no session");
            return;
        };
        let state = {
            let chat = self.chat(chat_id);
            let state = chat.lock().await;
            state.clone()
        };
        gate.persist(session, &state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn session() -> Session {
        Session {
            user_id: "u-1".into(),
            email: "ada@example.com".into(),
        }
    }

    #[tokio::test]
    async fn appends_are_ordered_and_bump_revision() {
        let store = ConversationStore::new();
        let s = session();
        let r1 = store
            .append(Some(&s), "c1", vec![Message::text(Role::User, "one")])
            .await;
        let r2 = store
            .append(Some(&s), "c1", vec![Message::text(Role::Assistant, "two")])
            .await;
        assert_eq!(r1, Some(1));
        assert_eq!(r2, Some(2));

        let state = store.get_state(Some(&s), "c1").await.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].content.as_text(), "one");
        assert_eq!(state.messages[1].content.as_text(), "two");
    }

    #[tokio::test]
    async fn no_session_is_a_silent_noop() {
        let store = ConversationStore::new();
        assert_eq!(
            store
                .append(None, "c1", vec![Message::text(Role::User, "hi")])
                .await,
            None
        );
        assert_eq!(store.get_state(None, "c1").await, None);

        // The skipped append must not have touched the log.
        let state = store.get_state(Some(&session()), "c1").await.unwrap();
        assert!(state.messages.is_empty());
    }

    #[tokio::test]
    async fn chats_are_isolated() {
        let store = ConversationStore::new();
        let s = session();
        store
            .append(Some(&s), "a", vec![Message::text(Role::User, "for a")])
            .await;
        store
            .append(Some(&s), "b", vec![Message::text(Role::User, "for b")])
            .await;

        let a = store.get_state(Some(&s), "a").await.unwrap();
        let b = store.get_state(Some(&s), "b").await.unwrap();
        assert_eq!(a.messages[0].content.as_text(), "for a");
        assert_eq!(b.messages[0].content.as_text(), "for b");
    }

    #[tokio::test]
    async fn concurrent_appends_are_serialized() {
        let store = Arc::new(ConversationStore::new());
        let s = session();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let s = s.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .append(Some(&s), "c1", vec![Message::text(Role::User, format!("m{i}"))])
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let state = store.get_state(Some(&s), "c1").await.unwrap();
        assert_eq!(state.messages.len(), 32);
        assert_eq!(state.revision, 32);
    }

    #[tokio::test]
    async fn load_replaces_log_for_cold_replay() {
        let store = ConversationStore::new();
        let s = session();
        store
            .append(Some(&s), "c1", vec![Message::text(Role::User, "stale")])
            .await;
        store
            .load(
                Some(&s),
                "c1",
                vec![
                    Message::text(Role::User, "restored"),
                    Message::text(Role::Assistant, "reply"),
                ],
            )
            .await;
        let state = store.get_state(Some(&s), "c1").await.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].content.as_text(), "restored");
    }
}
