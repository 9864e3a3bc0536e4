//! Error types for token acquisition and brokering.
//!
//! `TokenError` is `Clone` because a single refresh outcome is shared with
//! every caller waiting on that refresh. Response bodies are carried as data
//! for diagnostics but are kept out of `Display` output so they never reach
//! log messages by accident.

use thiserror::Error;

/// Errors that can occur while obtaining a service token.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// Identity provider answered with a non-success status.
    ///
    /// The response body is available on the variant for diagnostics; it is
    /// not part of the error message.
    #[error("Token endpoint returned status {status}")]
    Endpoint {
        /// HTTP status code of the rejection.
        status: u16,
        /// Raw response body, for diagnostics only.
        body: String,
    },

    /// Success status but the body could not be decoded into a token.
    #[error("Invalid token response: {0}")]
    Decode(String),

    /// HTTP client or transport error (connect failure, request timeout).
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Configuration error (HTTP client could not be built).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller's wait deadline elapsed before a token was available.
    #[error("Deadline elapsed while waiting for a token")]
    DeadlineExceeded,

    /// The refresh task stopped without reporting an outcome.
    #[error("Token channel closed")]
    ChannelClosed,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_display() {
        let err = TokenError::Endpoint {
            status: 401,
            body: "{\"error\": \"invalid_client\"}".to_string(),
        };
        assert!(err.to_string().contains("401"));

        let err = TokenError::Decode("missing field `access_token`".to_string());
        assert!(err.to_string().contains("missing field"));

        let err = TokenError::Http("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err = TokenError::Configuration("bad client".to_string());
        assert!(err.to_string().contains("bad client"));

        let err = TokenError::DeadlineExceeded;
        assert!(err.to_string().contains("Deadline"));

        let err = TokenError::ChannelClosed;
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_endpoint_error_display_omits_body() {
        let err = TokenError::Endpoint {
            status: 400,
            body: "secret-bearing diagnostic body".to_string(),
        };
        assert!(!err.to_string().contains("secret-bearing"));
    }

    #[test]
    fn test_token_error_clone() {
        let err = TokenError::Endpoint {
            status: 503,
            body: "unavailable".to_string(),
        };
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
