//! Error types for talon

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while monitoring, storing, or exporting alerts
#[derive(Debug, Error)]
pub enum TalonError {
    /// Credentials rejected, or a token could not be obtained/refreshed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Remote API signalled a rate limit (HTTP 429)
    #[error("Rate limited by remote API{}", retry_hint(.retry_after))]
    RateLimited {
        /// Server-provided delay before the next attempt, if any
        retry_after: Option<Duration>,
    },

    /// Connection, timeout, or 5xx failure talking to the remote API
    #[error("Network error: {0}")]
    Network(String),

    /// Remote API answered with a non-retryable status
    #[error("API returned {status}: {body}")]
    Api {
        status: u16,
        body: String,
    },

    /// Bounded retry budget spent on a retryable error
    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<TalonError>,
    },

    /// Alert store failure (disk full, corruption, locked database)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operator input rejected at configuration time
    #[error("Invalid {field}: {reason}")]
    Validation {
        field: String,
        reason: String,
    },

    /// Configuration file or profile error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secret sealing or unsealing failure
    #[error("Secret error: {0}")]
    Secret(String),

    /// Export rendering failure
    #[error("Export error: {0}")]
    Export(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl TalonError {
    /// Shorthand for a validation error on a named field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the operation may succeed if attempted again after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }

    /// Server-provided delay hint, if this error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether this error ends the session and requires re-authentication
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::RetryExhausted { last, .. } => last.is_auth(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for TalonError {
    fn from(e: rusqlite::Error) -> Self {
        TalonError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for TalonError {
    fn from(e: reqwest::Error) -> Self {
        TalonError::Network(e.to_string())
    }
}

impl From<csv::Error> for TalonError {
    fn from(e: csv::Error) -> Self {
        TalonError::Export(e.to_string())
    }
}

/// Result type alias for talon operations
pub type Result<T> = std::result::Result<T, TalonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TalonError::RateLimited { retry_after: None }.is_retryable());
        assert!(TalonError::Network("reset".into()).is_retryable());
        assert!(!TalonError::Auth("bad secret".into()).is_retryable());
        assert!(!TalonError::Storage("disk full".into()).is_retryable());
        assert!(!TalonError::Api { status: 400, body: String::new() }.is_retryable());
    }

    #[test]
    fn test_rate_limit_message_includes_hint() {
        let err = TalonError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.to_string(), "Rate limited by remote API (retry after 7s)");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let bare = TalonError::RateLimited { retry_after: None };
        assert_eq!(bare.to_string(), "Rate limited by remote API");
    }

    #[test]
    fn test_auth_seen_through_retry_exhausted() {
        let err = TalonError::RetryExhausted {
            attempts: 3,
            last: Box::new(TalonError::Auth("expired".into())),
        };
        assert!(err.is_auth());
        assert!(!TalonError::Network("x".into()).is_auth());
    }

    #[test]
    fn test_validation_display() {
        let err = TalonError::validation("severity", "must be a number");
        assert_eq!(err.to_string(), "Invalid severity: must be a number");
    }
}
