//! Error taxonomy shared by the chat core and its adapters

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The inference service could not be reached, or refused to open a stream.
    #[error("inference service unreachable: {0}")]
    ServiceUnreachable(String),

    /// A response stream broke after it was opened.
    #[error("response stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("no chat exists with id {0}")]
    NotFound(Uuid),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("a response is already being streamed")]
    Busy,

    /// The storage medium rejected a read or write, or holds a corrupt record.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ChatError {
    /// Errors that mean the inference service should be re-probed.
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self,
            ChatError::ServiceUnreachable(_) | ChatError::StreamInterrupted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let id = Uuid::nil();
        assert_eq!(
            ChatError::NotFound(id).to_string(),
            "no chat exists with id 00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_is_service_failure() {
        assert!(ChatError::ServiceUnreachable("refused".into()).is_service_failure());
        assert!(ChatError::StreamInterrupted("reset".into()).is_service_failure());
        assert!(!ChatError::Busy.is_service_failure());
        assert!(!ChatError::Storage("disk full".into()).is_service_failure());
        assert!(!ChatError::NotFound(Uuid::nil()).is_service_failure());
    }
}
