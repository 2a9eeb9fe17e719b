//! Conversation history

use serde::{Deserialize, Serialize};

/// Author of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Prior turns of one conversation, oldest first
///
/// Turns are kept exactly as pushed: never reordered, never deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History made of earlier replies, each one an assistant turn
    pub fn from_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            messages: responses.into_iter().map(ChatMessage::assistant).collect(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::assistant(content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop the oldest turns so that at most `max` remain
    pub fn retain_last(&mut self, max: usize) {
        if self.messages.len() > max {
            let excess = self.messages.len() - max;
            self.messages.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_responses_are_assistant_turns() {
        let history = ConversationHistory::from_responses(["hey there", "so anyway"]);
        assert_eq!(
            history.messages(),
            &[
                ChatMessage::assistant("hey there"),
                ChatMessage::assistant("so anyway")
            ]
        );
    }

    #[test]
    fn test_order_and_duplicates_preserved() {
        let mut history = ConversationHistory::new();
        history.push_user("a");
        history.push_assistant("b");
        history.push_user("a");

        let contents: Vec<&str> = history.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_retain_last_keeps_newest() {
        let mut history = ConversationHistory::from_responses(["1", "2", "3", "4"]);
        history.retain_last(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].content, "3");
        assert_eq!(history.messages()[1].content, "4");

        history.retain_last(10);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
