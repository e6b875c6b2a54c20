//! Conversation history and prompt assembly
//!
//! The history is replayed verbatim to the response generator, so insertion
//! order is conversation order. At most one system entry exists and it is
//! always first.

use serde::{Deserialize, Serialize};

/// Role of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged text entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// First user message of a history-keeping run
fn recipe_preamble(recipe: &str) -> String {
    format!("Here is my recipe:\n{recipe}")
}

/// Messages for a run that keeps no history: the recipe travels with every question
#[must_use]
pub fn one_shot_messages(system_prompt: &str, recipe: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!("{}\n\nQuestion: {question}", recipe_preamble(recipe))),
    ]
}

/// Ordered conversation owned by one controller run
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    /// Seed with the persona prompt and the recipe
    ///
    /// The recipe is sent once here; later turns append only questions.
    #[must_use]
    pub fn seeded(system_prompt: &str, recipe: &str) -> Self {
        Self {
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(recipe_preamble(recipe)),
            ],
        }
    }

    /// Messages to send for `question`, with the system entry set to `system_prompt`
    ///
    /// Does not modify the history; a failed turn leaves no trace.
    #[must_use]
    pub fn messages_for(&self, question: &str, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = self.messages.clone();
        set_system(&mut messages, system_prompt);
        messages.push(ChatMessage::user(question));
        messages
    }

    /// Append a completed exchange and refresh the system entry
    pub fn record_exchange(&mut self, question: &str, answer: &str, system_prompt: &str) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
        set_system(&mut self.messages, system_prompt);
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Replace the leading system entry, inserting one if absent
fn set_system(messages: &mut Vec<ChatMessage>, system_prompt: &str) {
    match messages.first_mut() {
        Some(first) if first.role == Role::System => system_prompt.clone_into(&mut first.content),
        _ => messages.insert(0, ChatMessage::system(system_prompt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_history_carries_recipe_once() {
        let mut history = ConversationHistory::seeded("be helpful", "Boil pasta.");
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[1].content, "Here is my recipe:\nBoil pasta.");

        history.record_exchange("how long?", "Ten minutes.", "be helpful");
        let recipe_mentions = history
            .messages()
            .iter()
            .filter(|m| m.content.contains("Boil pasta."))
            .count();
        assert_eq!(recipe_mentions, 1);
    }

    #[test]
    fn messages_for_does_not_mutate() {
        let history = ConversationHistory::seeded("p1", "r");
        let messages = history.messages_for("q", "p2");

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatMessage::system("p2"));
        assert_eq!(messages[2], ChatMessage::user("q"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].content, "p1");
    }

    #[test]
    fn record_exchange_refreshes_system_prompt() {
        let mut history = ConversationHistory::seeded("normal prompt", "r");
        history.record_exchange("q", "a", "sassy prompt");

        let systems: Vec<_> = history
            .messages()
            .iter()
            .filter(|m| m.role == Role::System)
            .collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(history.messages()[0].content, "sassy prompt");
        assert_eq!(history.messages()[2], ChatMessage::user("q"));
        assert_eq!(history.messages()[3], ChatMessage::assistant("a"));
    }

    #[test]
    fn system_entry_inserted_when_missing() {
        let mut history = ConversationHistory::default();
        history.record_exchange("q", "a", "prompt");
        assert_eq!(history.messages()[0], ChatMessage::system("prompt"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn one_shot_embeds_recipe_and_question() {
        let messages = one_shot_messages("sys", "Mix flour.", "what next?");
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[1].content,
            "Here is my recipe:\nMix flour.\n\nQuestion: what next?"
        );
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
