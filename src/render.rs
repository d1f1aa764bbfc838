//! Renderable projection of conversation state.
//!
//! [`project`] is the pure, idempotent derivation used for cold replay
//! from storage; [`SharedView`] is the per-session, disposable view the
//! live turn extends delta by delta. Both converge on the same shape:
//! system messages never appear, tool messages become typed cards.

use crate::state::ConversationState;
use crate::types::{MessageContent, Role, ToolInvocation};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq)]
pub enum Renderable {
    UserText { text: String },
    AssistantText { text: String, live: bool },
    ActionCard { invocation: ToolInvocation },
    TurnError { message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderEntry {
    pub id: String,
    pub renderable: Renderable,
}

/// Ordered, derived, never-persisted view of one chat.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderState {
    pub entries: Vec<RenderEntry>,
}

/// Pure projection: identical input state always yields identical
/// output. System messages are bookkeeping and never rendered.
pub fn project(state: &ConversationState) -> RenderState {
    let entries = state
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let renderable = match (&m.role, &m.content) {
                (_, MessageContent::Tool { invocation }) => Renderable::ActionCard {
                    invocation: invocation.clone(),
                },
                (Role::User, MessageContent::Text { text }) => {
                    Renderable::UserText { text: text.clone() }
                }
                (_, MessageContent::Text { text }) => Renderable::AssistantText {
                    text: text.clone(),
                    live: false,
                },
            };
            RenderEntry {
                id: m.id.clone(),
                renderable,
            }
        })
        .collect();
    RenderState { entries }
}

/// Handle to the session's live render state. Cloned into the turn task
/// so deltas land in the view as they stream.
#[derive(Clone, Default)]
pub struct SharedView {
    inner: Arc<Mutex<RenderState>>,
}

impl SharedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RenderState {
        self.inner.lock().expect("render view poisoned").clone()
    }

    /// Rebuild the whole view from a projection, for cold replay.
    pub fn replace(&self, state: RenderState) {
        *self.inner.lock().expect("render view poisoned") = state;
    }

    pub fn push_user(&self, id: &str, text: &str) {
        let mut view = self.inner.lock().expect("render view poisoned");
        view.entries.push(RenderEntry {
            id: id.to_string(),
            renderable: Renderable::UserText {
                text: text.to_string(),
            },
        });
    }

    /// Open a live, empty assistant entry; created on the first delta.
    pub fn open_assistant(&self, id: &str) {
        let mut view = self.inner.lock().expect("render view poisoned");
        view.entries.push(RenderEntry {
            id: id.to_string(),
            renderable: Renderable::AssistantText {
                text: String::new(),
                live: true,
            },
        });
    }

    pub fn extend_assistant(&self, id: &str, delta: &str) {
        let mut view = self.inner.lock().expect("render view poisoned");
        if let Some(entry) = view.entries.iter_mut().rev().find(|e| e.id == id)
            && let Renderable::AssistantText { text, live: true } = &mut entry.renderable
        {
            text.push_str(delta);
        }
    }

    /// Seal the live entry with the full buffered text.
    pub fn seal_assistant(&self, id: &str, full_text: &str) {
        let mut view = self.inner.lock().expect("render view poisoned");
        if let Some(entry) = view.entries.iter_mut().rev().find(|e| e.id == id) {
            entry.renderable = Renderable::AssistantText {
                text: full_text.to_string(),
                live: false,
            };
        }
    }

    /// Surface an error state in place of the assistant's entry.
    pub fn fail_assistant(&self, id: &str, message: &str) {
        let mut view = self.inner.lock().expect("render view poisoned");
        let error = Renderable::TurnError {
            message: message.to_string(),
        };
        match view.entries.iter_mut().rev().find(|e| e.id == id) {
            Some(entry) => entry.renderable = error,
            None => view.entries.push(RenderEntry {
                id: id.to_string(),
                renderable: error,
            }),
        }
    }

    pub fn push_action(&self, id: &str, invocation: ToolInvocation) {
        let mut view = self.inner.lock().expect("render view poisoned");
        view.entries.push(RenderEntry {
            id: id.to_string(),
            renderable: Renderable::ActionCard { invocation },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionPhase, Message};

    fn state() -> ConversationState {
        let mut s = ConversationState::new("c1");
        s.messages = vec![
            Message::text(Role::User, "question"),
            Message::text(Role::System, "[internal bookkeeping]"),
            Message::text(Role::Assistant, "answer"),
            Message::new(
                Role::Tool,
                MessageContent::Tool {
                    invocation: ToolInvocation {
                        id: 1,
                        kind: "confirm_purchase".into(),
                        args: serde_json::json!({"symbol": "DOGE"}),
                        phase: ActionPhase::Done,
                        result: None,
                    },
                },
            ),
        ];
        s
    }

    #[test]
    fn projection_excludes_system_messages() {
        let rendered = project(&state());
        assert_eq!(rendered.entries.len(), 3);
        for entry in &rendered.entries {
            assert!(!matches!(
                entry.renderable,
                Renderable::AssistantText { ref text, .. } if text.contains("bookkeeping")
            ));
        }
    }

    #[test]
    fn projection_is_idempotent() {
        let s = state();
        assert_eq!(project(&s), project(&s));
    }

    #[test]
    fn projection_maps_tool_messages_to_cards() {
        let rendered = project(&state());
        assert!(matches!(
            rendered.entries[2].renderable,
            Renderable::ActionCard { ref invocation } if invocation.kind == "confirm_purchase"
        ));
    }

    #[test]
    fn projected_entries_are_sealed() {
        let rendered = project(&state());
        assert!(matches!(
            rendered.entries[1].renderable,
            Renderable::AssistantText { live: false, .. }
        ));
    }

    #[test]
    fn live_view_extend_then_seal() {
        let view = SharedView::new();
        view.push_user("m1", "question");
        view.open_assistant("m2");
        view.extend_assistant("m2", "par");
        view.extend_assistant("m2", "tial");

        let snap = view.snapshot();
        assert!(matches!(
            snap.entries[1].renderable,
            Renderable::AssistantText { ref text, live: true } if text == "partial"
        ));

        view.seal_assistant("m2", "partial answer");
        let snap = view.snapshot();
        assert!(matches!(
            snap.entries[1].renderable,
            Renderable::AssistantText { ref text, live: false } if text == "partial answer"
        ));
    }

    #[test]
    fn failure_replaces_live_entry_in_place() {
        let view = SharedView::new();
        view.open_assistant("m2");
        view.extend_assistant("m2", "part");
        view.fail_assistant("m2", "stream disconnected");

        let snap = view.snapshot();
        assert_eq!(snap.entries.len(), 1);
        assert!(matches!(
            snap.entries[0].renderable,
            Renderable::TurnError { ref message } if message == "stream disconnected"
        ));
    }

    #[test]
    fn live_view_converges_on_projection() {
        let mut s = ConversationState::new("c1");
        s.messages = vec![
            Message::text(Role::User, "question"),
            Message::text(Role::Assistant, "answer"),
        ];

        let view = SharedView::new();
        view.push_user(&s.messages[0].id, "question");
        view.open_assistant(&s.messages[1].id);
        view.extend_assistant(&s.messages[1].id, "answer");
        view.seal_assistant(&s.messages[1].id, "answer");

        assert_eq!(view.snapshot(), project(&s));
    }
}
