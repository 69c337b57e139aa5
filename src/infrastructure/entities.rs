//! Storage entities

use crate::core::chat::{Message, Role, Transcript};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Row of the `storage` table.
#[derive(Debug, FromRow)]
pub struct StorageEntry {
    pub key: String,
    pub value: String,
}

/// Persisted shape of one chat, stored as JSON under the chat's key.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRecord {
    pub name: String,
    pub history: Vec<MessageRecord>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub role: Role,
    pub content: String,
    /// Always `false` on disk; only finalized messages are ever written.
    #[serde(default)]
    pub current: bool,
}

impl From<&Transcript> for ChatRecord {
    fn from(transcript: &Transcript) -> Self {
        ChatRecord {
            name: transcript.name().to_owned(),
            history: transcript
                .messages()
                .iter()
                .map(|m| MessageRecord {
                    role: m.role,
                    content: m.content.clone(),
                    current: false,
                })
                .collect(),
        }
    }
}

impl ChatRecord {
    pub fn into_transcript(self, id: Uuid) -> Transcript {
        Transcript::with_history(
            id,
            self.name,
            self.history
                .into_iter()
                .map(|m| Message::new(m.role, m.content))
                .collect(),
        )
    }
}
