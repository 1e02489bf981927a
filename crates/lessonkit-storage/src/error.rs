use lessonkit_core::TransferError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend: {0}")]
    Backend(#[from] opendal::Error),

    #[error("url {url} does not belong to {base}")]
    ForeignUrl { url: String, base: String },
}

impl StorageError {
    /// Connection resets, throttling and other errors worth retrying as-is
    pub fn is_temporary(&self) -> bool {
        match self {
            StorageError::Backend(e) => {
                e.is_temporary() || e.kind() == opendal::ErrorKind::RateLimited
            }
            StorageError::ForeignUrl { .. } => false,
        }
    }
}

impl From<StorageError> for TransferError {
    fn from(err: StorageError) -> Self {
        if err.is_temporary() {
            TransferError::NetworkFailure(err.to_string())
        } else {
            TransferError::StorageService(err.to_string())
        }
    }
}
