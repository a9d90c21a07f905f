//! Common error types for codechat.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while handling identifiers and wire envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An inbound frame is not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// An outbound envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}
