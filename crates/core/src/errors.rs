//! Error types shared by every remindly crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::classify_http_status;

/// Result type alias for remindly operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Retry policy class for failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Top-level error for the sync subsystem.
#[derive(Debug, Error)]
pub enum Error {
    /// Local persistence failure (outbox or entity cache).
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Failure reported by (or while reaching) the remote store.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Malformed input or payload.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not allowed in the current state.
    #[error("Illegal state: {0}")]
    State(String),
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("Invalid {entity} payload: {message}")]
    InvalidPayload { entity: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors raised by remote store implementations.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// DNS failure or refused connection.
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Timeout(_) | Self::Unreachable(_) | Self::Io(_) => RetryClass::Retryable,
            Self::Api { status, .. } => classify_http_status(*status),
            Self::InvalidResponse(_) | Self::InvalidRequest(_) => RetryClass::Permanent,
            Self::Auth(_) => RetryClass::ReauthRequired,
        }
    }
}

impl Error {
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidInput(message.into()))
    }

    /// Transport failures are retryable; validation, state and storage failures are not.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Remote(err) => err.retry_class(),
            Self::Database(_) | Self::Validation(_) | Self::Serialization(_) | Self::State(_) => {
                RetryClass::Permanent
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_class() == RetryClass::Retryable
    }

    /// Stable, human-readable message for the UI layer.
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote(RemoteError::Timeout(_)) => {
                "The server took too long to respond. Please try again.".to_string()
            }
            Self::Remote(RemoteError::Unreachable(_)) | Self::Remote(RemoteError::Io(_)) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            Self::Remote(RemoteError::Auth(_)) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Remote(err @ RemoteError::Api { .. }) => match err.retry_class() {
                RetryClass::Retryable => {
                    "The server is busy right now. Please try again later.".to_string()
                }
                RetryClass::ReauthRequired => {
                    "Your session has expired. Please sign in again.".to_string()
                }
                RetryClass::Permanent => "The server rejected this change.".to_string(),
            },
            Self::Remote(_) => "The server sent an unexpected response.".to_string(),
            Self::Validation(err) => format!("Invalid data: {}", err),
            Self::Serialization(_) => "Invalid data format.".to_string(),
            Self::Database(_) => "Failed to save changes on this device.".to_string(),
            Self::State(message) => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(Error::from(RemoteError::Timeout("30s".into())).is_retryable());
        assert!(Error::from(RemoteError::Unreachable("dns".into())).is_retryable());
        assert!(Error::from(RemoteError::Io("reset".into())).is_retryable());
        assert!(Error::from(RemoteError::api(503, "unavailable")).is_retryable());
    }

    #[test]
    fn validation_and_state_errors_are_permanent() {
        assert_eq!(
            Error::invalid_input("empty title").retry_class(),
            RetryClass::Permanent
        );
        assert_eq!(
            Error::state("timer not found").retry_class(),
            RetryClass::Permanent
        );
        assert_eq!(
            Error::from(ValidationError::UnknownEntityType("bogus".into())).retry_class(),
            RetryClass::Permanent
        );
        assert_eq!(
            Error::from(RemoteError::api(400, "bad row")).retry_class(),
            RetryClass::Permanent
        );
    }

    #[test]
    fn auth_errors_require_reauth() {
        let err = Error::from(RemoteError::api(401, "jwt expired"));
        assert_eq!(err.retry_class(), RetryClass::ReauthRequired);
        assert!(!err.is_retryable());
        assert!(err.user_message().contains("sign in"));
    }

    #[test]
    fn user_message_hides_internals() {
        let err = Error::from(RemoteError::Unreachable("dns error: no such host".into()));
        assert!(!err.user_message().contains("dns"));
    }
}
