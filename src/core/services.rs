//! Implementations for the service the app needs.
//!

use crate::core::chat::Transcript;
use crate::core::error::ChatError;
use crate::core::traits::SessionStore;
use crate::infrastructure::entities::ChatRecord;
use crate::infrastructure::traits::KeyValueStorage;
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use log::{debug, error, info};
use uuid::Uuid;

/// Namespace reserved for chat records in the storage medium.
pub const CHAT_KEY_PREFIX: &str = "ollama.chat";
/// Separates the namespace from the id. Never occurs in a UUID string.
pub const CHAT_KEY_DELIMITER: char = '.';

pub fn chat_key(id: Uuid) -> String {
    format!("{CHAT_KEY_PREFIX}{CHAT_KEY_DELIMITER}{id}")
}

/// Extracts the chat id from a storage key, if the key belongs to a chat.
pub fn parse_chat_key(key: &str) -> Option<Uuid> {
    let id = key
        .strip_prefix(CHAT_KEY_PREFIX)?
        .strip_prefix(CHAT_KEY_DELIMITER)?;
    match Uuid::parse_str(id) {
        Ok(id) => Some(id),
        Err(_) => {
            debug!("skipping storage key {key:?} with a malformed chat id");
            None
        }
    }
}

/// Session store over a string-keyed storage medium.
pub struct LocalSessionStore {
    storage: Ref<dyn KeyValueStorage>,
}

#[injectable(SessionStore)]
impl LocalSessionStore {
    #[inject]
    pub fn new(storage: Ref<dyn KeyValueStorage>) -> LocalSessionStore {
        LocalSessionStore { storage }
    }
}

#[async_trait]
impl SessionStore for LocalSessionStore {
    async fn create(&self, name: &str) -> Result<Uuid, ChatError> {
        let transcript = Transcript::new(Uuid::now_v7(), name);
        self.save(&transcript).await?;
        info!("created chat {} ({name:?})", transcript.id());
        Ok(transcript.id())
    }

    async fn load(&self, id: Uuid) -> Result<Transcript, ChatError> {
        let raw = self
            .storage
            .get(&chat_key(id))
            .await?
            .ok_or(ChatError::NotFound(id))?;

        let record: ChatRecord = serde_json::from_str(&raw).map_err(|e| {
            error!("chat {id} is corrupt: {e}");
            ChatError::Storage(format!("chat {id} is corrupt: {e}"))
        })?;

        Ok(record.into_transcript(id))
    }

    async fn save(&self, transcript: &Transcript) -> Result<(), ChatError> {
        let json = serde_json::to_string(&ChatRecord::from(transcript))
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        self.storage.set(&chat_key(transcript.id()), &json).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), ChatError> {
        self.storage.remove(&chat_key(id)).await
    }

    async fn list(&self) -> Result<Vec<Uuid>, ChatError> {
        let mut ids: Vec<Uuid> = self
            .storage
            .keys()
            .await?
            .iter()
            .filter_map(|key| parse_chat_key(key))
            .collect();

        // v7 ids order by creation time
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }
}
