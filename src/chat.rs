use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::ChatMessage;

/// In-call chat history. Not persisted.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Arc<Vec<ChatMessage>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an outgoing message. Blank input yields nothing.
    pub fn compose(sender_id: &str, sender_name: &str, content: &str) -> Option<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        Some(ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Append unless a message with the same id is already present.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        Arc::make_mut(&mut self.messages).push(message);
        true
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn shared(&self) -> Arc<Vec<ChatMessage>> {
        self.messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_messages_are_not_composed() {
        assert!(ChatLog::compose("p1", "Ann", "   ").is_none());
        let msg = ChatLog::compose("p1", "Ann", "  hi  ").unwrap();
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn push_dedupes_by_id() {
        let mut log = ChatLog::new();
        let msg = ChatLog::compose("p1", "Ann", "hi").unwrap();
        assert!(log.push(msg.clone()));
        assert!(!log.push(msg));
        assert_eq!(log.messages().len(), 1);
    }
}
