use db::models::entity::{DecodeError, EncodeError};
use remote::RemoteError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("remote call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("provisional id {0} must not be sent to the backend")]
    ProvisionalLeak(String),
    #[error("not signed in")]
    Unauthenticated,
    #[error("{collection} {id} is not in the local view")]
    NotFound { collection: String, id: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(collection: &str, id: impl ToString) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Failures caused by the backend or the network rather than by local
    /// state. These are rolled back and reported, never retried here.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Remote(err) => !matches!(err, RemoteError::Unauthenticated),
            _ => false,
        }
    }
}
