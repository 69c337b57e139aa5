//! Infrastructure traits, used for DI on higher levels

use crate::core::chat::{Fragment, Message, ModelDescriptor};
use crate::core::error::ChatError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Lazily produced response fragments. May yield an error mid-stream.
pub type FragmentStream = BoxStream<'static, Result<Fragment, ChatError>>;

/// String-keyed text storage. No expiry, no transactions.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, ChatError>;

    /// Inserts or overwrites the value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), ChatError>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), ChatError>;

    async fn keys(&self) -> Result<Vec<String>, ChatError>;
}

/// Client for the external inference service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Lists the models the service can run.
    ///
    /// Returns `ServiceUnreachable` when the service can't be reached.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ChatError>;

    /// Opens a streaming chat completion over the whole history.
    ///
    /// Fails with `ServiceUnreachable` when the stream can't be opened; errors while the stream
    /// is being consumed surface as `StreamInterrupted` items. The stream ends early once
    /// `cancel` is triggered.
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<FragmentStream, ChatError>;

    /// Opens a streaming single-prompt completion.
    async fn stream_generate(
        &self,
        model: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, ChatError>;
}
