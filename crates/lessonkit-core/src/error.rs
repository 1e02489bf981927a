use thiserror::Error;

use crate::types::{BlockId, BlockKind};

pub type AuthoringResult<T> = Result<T, AuthoringError>;

/// File rejected before any storage call was made
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("media type {media_type} is not allowed for {kind} blocks")]
    InvalidType { kind: BlockKind, media_type: String },

    #[error("{kind} file is {byte_size} bytes, limit is {max_bytes}")]
    TooLarge {
        kind: BlockKind,
        byte_size: u64,
        max_bytes: u64,
    },
}

/// Transfer to the asset storage service failed; the upload may be retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("storage service error: {0}")]
    StorageService(String),

    #[error("reading upload source: {0}")]
    Source(String),
}

/// Course repository could not persist or load lesson content
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("course repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("stored document is corrupt: {0}")]
    Corrupt(String),

    #[error("chapter not found: {0}")]
    ChapterNotFound(String),
}

/// Caller misuse: the operation does not apply to the current state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("block not found: {0}")]
    NotFound(BlockId),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("payload does not fit a {0} block")]
    KindMismatch(BlockKind),

    #[error("lesson has no blocks to save")]
    EmptyLesson,

    #[error("{0} upload(s) still in flight")]
    UploadsInFlight(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthoringError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl AuthoringError {
    /// Transfer failures and repository outages can be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthoringError::Transfer(_)
                | AuthoringError::Persistence(PersistenceError::RepositoryUnavailable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AuthoringError::from(TransferError::NetworkFailure("reset".into())).is_retryable());
        assert!(
            AuthoringError::from(PersistenceError::RepositoryUnavailable("503".into()))
                .is_retryable()
        );
        assert!(!AuthoringError::from(PersistenceError::Corrupt("bad json".into())).is_retryable());
        assert!(!AuthoringError::from(StateError::EmptyLesson).is_retryable());
        assert!(!AuthoringError::from(ValidationError::TooLarge {
            kind: BlockKind::Video,
            byte_size: 2,
            max_bytes: 1,
        })
        .is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = ValidationError::InvalidType {
            kind: BlockKind::Image,
            media_type: "image/bmp".into(),
        };
        assert_eq!(
            err.to_string(),
            "media type image/bmp is not allowed for image blocks"
        );
        let err: AuthoringError = StateError::UploadsInFlight(2).into();
        assert_eq!(err.to_string(), "2 upload(s) still in flight");
    }
}
