//! Prompt assembly.
//!
//! Pure functions of their inputs: a system instruction embedding the
//! bounded context, the full message history in original order, and a
//! trailing context-reminder entry.

use crate::types::{Message, MessageContent, Role};
use serde::Serialize;

/// Model input: system instruction plus ordered role/content pairs.
#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<PromptMessage>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

fn system_instruction(context: &str) -> String {
    format!(
        "You are a helpful legal AI assistant speaking with qualified legal professionals. \
Use the following pieces of context to answer the question at the end. \
Use the context as best you can to directly answer the question and be clear in your thought process. \
Only use the context to answer the question. \
Provide detailed answers with relevant context, and specific recommendations and numbers when relevant. \
You must always state from which paragraph/section/chapter of the source material you obtained the context - be as specific as you can. \
If you don't know the answer or cannot find it, say you don't know. Do not make up an answer as this may cause harm. \
If the question is not related to the context, politely respond that you are tuned to only answer questions that are related to the context. \
List all source pages/chapters you used as a reference section at the end of your response.\n\
Context:\n{context}"
    )
}

/// Build the model input for one turn. No side effects.
pub fn build_prompt(context: &str, history: &[Message]) -> Prompt {
    let mut messages: Vec<PromptMessage> = history
        .iter()
        .map(|m| PromptMessage {
            role: m.role,
            content: m.content.as_text().to_string(),
        })
        .collect();

    messages.push(PromptMessage {
        role: Role::System,
        content: format!("Here is some relevant information from your documents: {context}"),
    });

    Prompt {
        system: system_instruction(context),
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn history() -> Vec<Message> {
        vec![
            Message::text(Role::User, "What does §1601 cover?"),
            Message::text(Role::Assistant, "Maintenance obligations."),
            Message::text(Role::User, "And for adult children?"),
        ]
    }

    #[test]
    fn history_order_and_roles_are_preserved() {
        let prompt = build_prompt("ctx", &history());
        let roles: Vec<Role> = prompt.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::System]);
        assert_eq!(prompt.messages[0].content, "What does §1601 cover?");
    }

    #[test]
    fn context_appears_in_system_and_reminder() {
        let prompt = build_prompt("the handbook text", &history());
        assert!(prompt.system.contains("the handbook text"));
        let last = prompt.messages.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.content.contains("the handbook text"));
    }

    #[test]
    fn build_prompt_is_pure() {
        let h = history();
        assert_eq!(build_prompt("c", &h), build_prompt("c", &h));
    }
}
