use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Phase of a backgrounded action invocation.
///
/// `Done` and `Rejected` are terminal: once reached, no further
/// transition is permitted for that invocation id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPhase {
    Pending,
    Working,
    Done,
    Rejected,
}

impl ActionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionPhase::Done | ActionPhase::Rejected)
    }
}

/// Record of one action invocation, carried inside a tool message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: u64,
    pub kind: String,
    pub args: serde_json::Value,
    pub phase: ActionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Message payload: plain text, or a structured tool record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text { text: String },
    Tool { invocation: ToolInvocation },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    /// Text payload, empty for tool messages. Used by token estimation
    /// and title derivation.
    pub fn as_text(&self) -> &str {
        match self {
            MessageContent::Text { text } => text,
            MessageContent::Tool { .. } => "",
        }
    }
}

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// One entry in the conversation log. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: Self::allocate_id(),
            role,
            content,
        }
    }

    /// Reserve an id before the message exists, so a streaming turn can
    /// key its live render entry to the message it will commit.
    pub fn allocate_id() -> String {
        let n = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("msg-{n}")
    }

    pub fn with_id(id: impl Into<String>, role: Role, content: MessageContent) -> Self {
        Self {
            id: id.into(),
            role,
            content,
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, MessageContent::text(text))
    }
}

/// Passage returned by the vector index, ordered by descending score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Durable chat snapshot handed to the persistence store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub id: String,
    pub title: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub messages: Vec<Message>,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        let a = Message::text(Role::User, "hello");
        let b = Message::text(Role::User, "hello");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn tool_content_round_trips() {
        let content = MessageContent::Tool {
            invocation: ToolInvocation {
                id: 7,
                kind: "confirm_purchase".to_string(),
                args: serde_json::json!({"symbol": "DOGE", "quantity": 10}),
                phase: ActionPhase::Done,
                result: Some(serde_json::json!({"total": 420.0})),
            },
        };
        let json = serde_json::to_string(&content).unwrap();
        let back: MessageContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn terminal_phases() {
        assert!(ActionPhase::Done.is_terminal());
        assert!(ActionPhase::Rejected.is_terminal());
        assert!(!ActionPhase::Pending.is_terminal());
        assert!(!ActionPhase::Working.is_terminal());
    }
}
