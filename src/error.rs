//! Error taxonomy for the token lifecycle and provider API engine.
//!
//! Variants mirror the failure classes callers must distinguish:
//! configuration problems are never retried, refresh failures mean
//! "reconnect required", and API errors carry an HTTP status when one
//! was received (absent for network-level failures).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid provider credentials / encryption key.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No resolvable principal on the inbound request.
    #[error("authentication required: {0}")]
    Authentication(String),

    /// The principal has no active connection for this provider.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// A token refresh attempt was rejected or failed.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// A provider API call failed. `status_code` is present for HTTP
    /// failures and absent for network-level failures (timeout,
    /// connection error).
    #[error("API error: {message}")]
    Api {
        status_code: Option<u16>,
        message: String,
    },

    /// Provider returned HTTP 429.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// Credential store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Network-level failures that may succeed on retry. HTTP-status
    /// errors are never transient: a 4xx will not change on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Api {
                status_code: None,
                ..
            }
        )
    }

    /// Superset of [`is_transient`](Self::is_transient) that also covers
    /// 429 responses, for callers that choose to back off on rate limits.
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, Error::RateLimit(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status_code, .. } => *status_code,
            Error::RateLimit(_) => Some(429),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_is_transient() {
        let err = Error::Api {
            status_code: None,
            message: "connection refused".to_string(),
        };
        assert!(err.is_transient());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_http_error_is_not_transient() {
        let err = Error::Api {
            status_code: Some(404),
            message: "not found".to_string(),
        };
        assert!(!err.is_transient());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rate_limit_is_retryable_but_not_transient() {
        let err = Error::RateLimit("too many requests".to_string());
        assert!(!err.is_transient());
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), Some(429));
    }

    #[test]
    fn test_refresh_error_is_terminal() {
        let err = Error::TokenRefresh("invalid_grant".to_string());
        assert!(!err.is_transient());
        assert_eq!(err.status_code(), None);
    }
}
