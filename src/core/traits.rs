//! DI "Interfaces"

use crate::core::chat::Transcript;
use crate::core::error::ChatError;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates and persists an empty chat, returning its id.
    ///
    /// Ids are time-ordered, so sorting them sorts chats by creation time.
    async fn create(&self, name: &str) -> Result<Uuid, ChatError>;

    /// Loads a chat.
    ///
    /// Returns `NotFound` if no chat is stored under `id`.
    async fn load(&self, id: Uuid) -> Result<Transcript, ChatError>;

    /// Overwrites the chat stored under the transcript's id. Last write wins.
    async fn save(&self, transcript: &Transcript) -> Result<(), ChatError>;

    /// Deletes a chat. Deleting a missing chat succeeds.
    async fn delete(&self, id: Uuid) -> Result<(), ChatError>;

    /// Lists stored chat ids, newest first.
    async fn list(&self) -> Result<Vec<Uuid>, ChatError>;

    /// Renames a chat by loading, renaming and saving it.
    async fn rename(&self, id: Uuid, name: &str) -> Result<Transcript, ChatError> {
        let transcript = self.load(id).await?.renamed(name);
        self.save(&transcript).await?;
        Ok(transcript)
    }
}
