//! Client error types.

use chrono::{DateTime, Utc};
use laundrix_store::StorageError;
use thiserror::Error;

/// Errors returned by [`ApiClient`](crate::ApiClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("HTTP error {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("Timeout")]
    Timeout,

    /// No response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// The response body could not be read or decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The access token expired and could not be renewed.
    #[error("Access token expired at {expires_at}")]
    TokenExpired {
        /// Expiry claim of the rejected token.
        expires_at: DateTime<Utc>,
    },

    /// A request was rejected as unauthenticated and the token refresh that
    /// followed failed. Local credentials have been cleared.
    #[error("Authentication refresh failed: {reason}")]
    AuthRefreshFailed {
        /// The error that triggered the refresh.
        original: Box<ClientError>,
        /// Why the refresh failed.
        reason: RefreshFailure,
    },

    /// Too many requests were already waiting on the in-flight refresh.
    #[error("Too many requests waiting for token refresh (limit {limit})")]
    QueueOverflow {
        /// Configured bound of the waiting queue.
        limit: usize,
    },

    /// Credential storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A request URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Create an HTTP error.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    /// HTTP status of this error, looking through a failed refresh to the
    /// request that triggered it.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::AuthRefreshFailed { original, .. } => original.status(),
            _ => None,
        }
    }

    /// Whether the server rejected the credentials of this request (401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }

    /// Whether no response was received at all.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    /// Whether this failure is authentication related. Collaborators route
    /// the user to the login flow when this and [`Self::is_refresh_failed`]
    /// are both set.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthRefreshFailed { .. })
    }

    /// Whether a token refresh was attempted and failed.
    pub fn is_refresh_failed(&self) -> bool {
        matches!(self, Self::AuthRefreshFailed { .. })
    }

    /// The reason a refresh failed, if this is a refresh failure.
    pub fn refresh_failure(&self) -> Option<&RefreshFailure> {
        match self {
            Self::AuthRefreshFailed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() || err.is_body() {
            ClientError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ClientError::http(status.as_u16(), err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

/// Why a token refresh failed.
///
/// Cloned to every request that was waiting on the same refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    /// Neither the session nor storage holds a refresh token.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// The stored refresh token is past its expiry.
    #[error("refresh token expired")]
    RefreshTokenExpired,

    /// The refresh response carried no access token.
    #[error("refresh response did not include an access token")]
    MissingAccessToken,

    /// The refresh response did not rotate the refresh token. The old one is
    /// considered spent, so the session cannot continue.
    #[error("refresh response did not include a new refresh token")]
    RefreshTokenNotRotated,

    /// The refresh endpoint answered with a non-success status.
    #[error("refresh rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The refresh call never produced a usable response.
    #[error("refresh request failed: {0}")]
    Transport(String),

    /// The renewed tokens could not be persisted.
    #[error("failed to persist refreshed tokens: {0}")]
    Persistence(String),

    /// The task running the refresh was dropped before it finished.
    #[error("refresh was interrupted")]
    Interrupted,

    /// The session was cleared or replaced while the refresh was running.
    /// Its tokens were discarded.
    #[error("session changed while refreshing")]
    Superseded,
}

/// Outcome of joining a refresh through the
/// [`RefreshCoordinator`](crate::RefreshCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The waiting queue is full; the caller was rejected without waiting.
    #[error("too many requests waiting for token refresh (limit {limit})")]
    QueueFull {
        /// Configured bound of the waiting queue.
        limit: usize,
    },

    /// The refresh ran and failed.
    #[error(transparent)]
    Failed(#[from] RefreshFailure),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_failure_flags() {
        let err = ClientError::AuthRefreshFailed {
            original: Box::new(ClientError::http(401, "expired")),
            reason: RefreshFailure::RefreshTokenNotRotated,
        };

        assert!(err.is_auth_error());
        assert!(err.is_refresh_failed());
        assert_eq!(err.status(), Some(401));
        assert_eq!(
            err.refresh_failure(),
            Some(&RefreshFailure::RefreshTokenNotRotated)
        );
    }

    #[test]
    fn test_plain_errors_have_no_auth_flags() {
        let unauthorized = ClientError::http(401, "");
        assert!(unauthorized.is_unauthorized());
        assert!(!unauthorized.is_auth_error());
        assert!(!unauthorized.is_refresh_failed());

        let overflow = ClientError::QueueOverflow { limit: 50 };
        assert!(!overflow.is_auth_error());
        assert_eq!(overflow.status(), None);
    }

    #[test]
    fn test_network_classification() {
        assert!(ClientError::Timeout.is_network());
        assert!(ClientError::Network("connection refused".into()).is_network());
        assert!(!ClientError::http(503, "").is_network());
    }

    #[test]
    fn test_refresh_error_wraps_failure() {
        let err: RefreshError = RefreshFailure::MissingRefreshToken.into();
        assert_eq!(err.to_string(), "no refresh token available");
        assert_eq!(
            RefreshError::QueueFull { limit: 2 }.to_string(),
            "too many requests waiting for token refresh (limit 2)"
        );
    }
}
