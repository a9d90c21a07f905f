//! Wire envelopes for the streaming chat connection.
//!
//! Every frame is a JSON object tagged by its `type` field. The client sends
//! [`OutgoingEnvelope`]s and receives [`IncomingEnvelope`]s; unknown inbound
//! tags decode to [`IncomingEnvelope::Unknown`] so newer servers can add
//! message kinds without breaking older clients.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Text typed by the local user.
    User,
    /// Text produced by the model.
    Assistant,
}

impl Role {
    /// Human-readable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Sampling parameters attached to every outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    #[serde(default = "GenerationParams::default_temperature")]
    pub temperature: f32,
    /// Upper bound on generated tokens.
    #[serde(default = "GenerationParams::default_max_tokens")]
    pub max_tokens: u32,
}

impl GenerationParams {
    const fn default_temperature() -> f32 {
        0.7
    }

    const fn default_max_tokens() -> u32 {
        2048
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
        }
    }
}

/// Frames sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingEnvelope {
    /// A user message, optionally carrying a slash command.
    Message {
        /// Message text with any leading command removed.
        content: String,
        /// Slash command such as `/explain`; serialized as `null` when absent.
        command: Option<String>,
        /// Sampling temperature.
        temperature: f32,
        /// Upper bound on generated tokens.
        max_tokens: u32,
    },
    /// Advisory request to stop the current generation.
    Abort,
}

impl OutgoingEnvelope {
    /// Build a `message` envelope.
    #[must_use]
    pub fn message(
        content: impl Into<String>,
        command: Option<String>,
        params: GenerationParams,
    ) -> Self {
        Self::Message {
            content: content.into(),
            command,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }
    }

    /// Serialize to the JSON text sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Encode` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::Encode(e.to_string()))
    }
}

/// Frames received from the server.
///
/// Extra fields are ignored; the server emits `data` and `error` keys on every
/// frame, set to `null` when unused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingEnvelope {
    /// A text delta to append to the current assistant message.
    Content {
        /// The delta.
        data: String,
    },
    /// The current generation finished.
    Done,
    /// The current generation failed.
    Error {
        /// Error text suitable for display.
        error: String,
    },
    /// A tag this client does not understand.
    #[serde(other)]
    Unknown,
}

impl IncomingEnvelope {
    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MalformedEnvelope` if the text is not a JSON object
    /// with a `type` tag, or a known tag lacks its payload field.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CoreError::MalformedEnvelope(e.to_string()))
    }

    /// Short name of the envelope kind, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}
