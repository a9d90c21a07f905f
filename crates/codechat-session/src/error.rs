//! Session error types.

use thiserror::Error;

/// A result type using `SessionError`.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the transport session and the chat controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A send was attempted while the connection is not open.
    #[error("not connected")]
    NotConnected,

    /// An inbound frame could not be decoded; the frame was dropped.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The server closed the connection with the authorization-failure code.
    #[error("connection rejected by server (code {code}): {reason}")]
    TransportRejected {
        /// Close code received.
        code: u16,
        /// Close reason received, possibly empty.
        reason: String,
    },

    /// The reconnect budget is exhausted.
    #[error("connection lost after {attempts} reconnect attempts")]
    TransportLost {
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    /// The server reported a failure for the current generation.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Opening the connection failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The open connection reported an I/O or protocol error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The configured server URL cannot be turned into a chat endpoint.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// An outbound envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// The session was closed by the caller.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Returns `true` if this error ended the session for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TransportRejected { .. } | Self::TransportLost { .. } | Self::Closed
        )
    }
}

impl From<codechat_core::CoreError> for SessionError {
    fn from(err: codechat_core::CoreError) -> Self {
        match err {
            codechat_core::CoreError::MalformedEnvelope(msg) => Self::MalformedEnvelope(msg),
            codechat_core::CoreError::Encode(msg) => Self::Encode(msg),
            codechat_core::CoreError::InvalidId(e) => Self::InvalidEndpoint(e.to_string()),
        }
    }
}

/// Errors returned by [`ChatController`](crate::ChatController) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The input was blank.
    #[error("nothing to send")]
    EmptyInput,

    /// A response is still streaming; abort it first.
    #[error("a response is still being generated")]
    TurnInProgress,

    /// The transport refused the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use codechat_core::IncomingEnvelope;

    #[test]
    fn undecodable_frame_maps_to_malformed_envelope() {
        let err = SessionError::from(IncomingEnvelope::from_json("{not json").unwrap_err());
        assert!(matches!(err, SessionError::MalformedEnvelope(_)));
        assert!(!err.is_terminal());
    }

    #[test]
    fn generation_failure_carries_server_text() {
        let err = SessionError::Generation("Error: rate limited".to_string());
        assert_eq!(err.to_string(), "generation failed: Error: rate limited");
        assert!(!err.is_terminal());
    }
}
