/*
[INPUT]:  Error sources (HTTP, API, serialization, auth, config)
[OUTPUT]: Structured error types with context and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the coinmux adapter
#[derive(Error, Debug)]
pub enum CoinmuxError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response (non-2xx or an `error` field in the body)
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// Authentication failed or no token is available
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Session token is expired
    #[error("Session token expired, please re-authenticate")]
    TokenExpired,

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimit { retry_after: u64 },
}

impl CoinmuxError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoinmuxError::Http(_)
                | CoinmuxError::Api { .. }
                | CoinmuxError::RateLimit { .. }
                | CoinmuxError::InvalidResponse(_)
        )
    }

    /// Get retry delay in seconds (if the server told us)
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            CoinmuxError::RateLimit { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Check if error indicates authentication failure
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            CoinmuxError::Authentication { .. } | CoinmuxError::TokenExpired
        )
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        CoinmuxError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }
}

/// Result type alias for coinmux operations
pub type Result<T> = std::result::Result<T, CoinmuxError>;
