//! REST client error types.

use thiserror::Error;

/// A result type using `ApiError`.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by [`ApiClient`](crate::ApiClient).
#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP request could not be completed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server refused the credentials or the session expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// The server's `detail` text.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// A request was rejected before it was sent.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The call needs a session and there is none.
    #[error("not logged in")]
    NotAuthenticated,
}

impl ApiError {
    /// Returns `true` if logging in again could fix the error.
    #[must_use]
    pub const fn needs_login(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::NotAuthenticated)
    }
}
