use thiserror::Error;

/// Failure reported by the backend. Always carries a human readable message
/// and, when the backend supplies one, a machine readable code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request failed: {message}")]
    Request {
        message: String,
        code: Option<String>,
    },
    #[error("{collection} row {id} not found")]
    NotFound { collection: String, id: String },
    #[error("not authenticated")]
    Unauthenticated,
    #[error("subscription to {0} could not be established")]
    SubscriptionFailed(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RemoteError {
    pub fn request(message: impl Into<String>, code: Option<&str>) -> Self {
        Self::Request {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Request { code, .. } => code.as_deref(),
            Self::NotFound { .. } => Some("PGRST116"),
            Self::Unauthenticated => Some("401"),
            Self::SubscriptionFailed(_) | Self::Storage(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_expose_their_code() {
        let err = RemoteError::request("duplicate key", Some("23505"));
        assert_eq!(err.code(), Some("23505"));
        assert_eq!(err.to_string(), "request failed: duplicate key");
        assert_eq!(RemoteError::Storage("gone".into()).code(), None);
    }
}
