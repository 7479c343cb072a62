//! UI-agnostic conversation state
//!
//! The transcript is append-only except for its last element: while a reply
//! is streaming, the tail message is "open" and is the only thing that may
//! change. Everything before it is frozen once appended.

use serde::{Deserialize, Serialize};

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("a reply is still streaming into the last message")]
    TailOpen,
    #[error("there is no open reply to update")]
    NoOpenReply,
}

/// Ordered transcript with at most one open (streaming) message at the tail.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    tail_open: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_open_reply(&self) -> bool {
        self.tail_open
    }

    /// Append a finished message.
    pub fn append_message(
        &mut self,
        role: ChatRole,
        content: impl Into<String>,
    ) -> Result<(), ConversationError> {
        if self.tail_open {
            return Err(ConversationError::TailOpen);
        }
        self.messages.push(ChatMessage::new(role, content));
        Ok(())
    }

    /// Append the empty assistant placeholder that a streaming reply fills in.
    pub fn open_reply(&mut self) -> Result<(), ConversationError> {
        if self.tail_open {
            return Err(ConversationError::TailOpen);
        }
        self.messages.push(ChatMessage::new(ChatRole::Assistant, ""));
        self.tail_open = true;
        Ok(())
    }

    /// Replace the open tail's content with `content`.
    pub fn set_tail_content(&mut self, content: &str) -> Result<(), ConversationError> {
        if !self.tail_open {
            return Err(ConversationError::NoOpenReply);
        }
        let tail = self
            .messages
            .last_mut()
            .ok_or(ConversationError::NoOpenReply)?;
        tail.content.clear();
        tail.content.push_str(content);
        Ok(())
    }

    /// Finalize the open tail in place.
    pub fn close_reply(&mut self) {
        self.tail_open = false;
    }

    /// Roll back an open reply that never received content.
    ///
    /// Returns `true` when the placeholder was removed. A reply with content
    /// is kept and closed instead.
    pub fn remove_tail_if_empty(&mut self) -> bool {
        if !self.tail_open {
            return false;
        }
        self.tail_open = false;
        match self.messages.last() {
            Some(tail) if tail.role == ChatRole::Assistant && tail.content.is_empty() => {
                self.messages.pop();
                true
            }
            _ => false,
        }
    }
}
