//! Chat domain types: messages, transcripts and stream fragments.
//!
//! Transcripts are updated by value: every operation consumes the transcript and returns the
//! new one, so a value handed to an observer never changes underneath it.

use crate::core::error::ChatError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_CHAT_NAME: &str = "Untitled Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcript {
    id: Uuid,
    name: String,
    #[serde(rename = "history")]
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self::with_history(id, name, Vec::new())
    }

    pub fn with_history(id: Uuid, name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id,
            name: name.into(),
            messages,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// True when the last message was written by the assistant, which is what regenerating
    /// requires.
    pub fn ends_with_reply(&self) -> bool {
        matches!(self.last(), Some(m) if m.role == Role::Assistant)
    }

    pub fn renamed(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Replaces the content of the message at `index`, keeping its role.
    pub fn with_edited(mut self, index: usize, content: impl Into<String>) -> Result<Self, ChatError> {
        let len = self.messages.len();
        let message = self.messages.get_mut(index).ok_or_else(|| {
            ChatError::InvalidOperation(format!(
                "message index {index} is out of range for a chat of {len} messages"
            ))
        })?;
        message.content = content.into();
        Ok(self)
    }

    /// Keeps only the first `len` messages.
    pub fn truncated(mut self, len: usize) -> Self {
        self.messages.truncate(len);
        self
    }

    /// Drops the trailing assistant message. Fails, leaving nothing changed, when the
    /// transcript doesn't end with one.
    pub fn without_trailing_reply(mut self) -> Result<Self, ChatError> {
        if !self.ends_with_reply() {
            return Err(ChatError::InvalidOperation(
                "regenerating requires the chat to end with an assistant message".to_owned(),
            ));
        }
        self.messages.pop();
        Ok(self)
    }
}

/// One incremental chunk of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub role: Role,
    pub text: String,
}

impl Fragment {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// A model offered by the inference service. Everything beyond the name is passed through
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ModelDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: serde_json::Map::new(),
        }
    }
}
