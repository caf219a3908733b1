//! Error types for the REST client.

use remindly_core::errors::{Error, RemoteError};
use thiserror::Error;

/// Result type alias for REST client operations.
pub type Result<T> = std::result::Result<T, RemoteClientError>;

#[derive(Debug, Error)]
pub enum RemoteClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the REST API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (unknown table, bad configuration, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or malformed credentials
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl RemoteClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RemoteClientError> for RemoteError {
    fn from(err: RemoteClientError) -> Self {
        match err {
            RemoteClientError::Http(err) => {
                if err.is_timeout() {
                    RemoteError::Timeout(err.to_string())
                } else if err.is_connect() {
                    RemoteError::Unreachable(err.to_string())
                } else if err.is_decode() {
                    RemoteError::InvalidResponse(err.to_string())
                } else {
                    RemoteError::Io(err.to_string())
                }
            }
            RemoteClientError::Json(err) => RemoteError::InvalidResponse(err.to_string()),
            RemoteClientError::Api { status, message } => RemoteError::Api { status, message },
            RemoteClientError::InvalidRequest(message) => RemoteError::InvalidRequest(message),
            RemoteClientError::Auth(message) => RemoteError::Auth(message),
        }
    }
}

impl From<RemoteClientError> for Error {
    fn from(err: RemoteClientError) -> Self {
        Error::Remote(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remindly_core::errors::RetryClass;

    #[test]
    fn api_errors_keep_their_status_class() {
        let busy: RemoteError = RemoteClientError::api(503, "busy").into();
        assert_eq!(busy.retry_class(), RetryClass::Retryable);

        let rejected: RemoteError = RemoteClientError::api(422, "bad row").into();
        assert_eq!(rejected.retry_class(), RetryClass::Permanent);

        let expired: RemoteError = RemoteClientError::api(401, "jwt expired").into();
        assert_eq!(expired.retry_class(), RetryClass::ReauthRequired);
    }

    #[test]
    fn undecodable_json_is_permanent() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(RemoteClientError::from(json_err));
        assert!(!err.is_retryable());
    }
}
