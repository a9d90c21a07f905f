//! Session configuration.
//!
//! Values can be deserialized (every field has a default) or read from the
//! environment with [`SessionConfig::from_env`]:
//!
//! - `CODECHAT_SERVER`: server base URL (`http://`, `https://`, `ws://` or `wss://`)
//! - `CODECHAT_RECONNECT_ATTEMPTS`: reconnect budget before giving up
//! - `CODECHAT_RECONNECT_DELAY_MS`: base delay, multiplied by the attempt number
//! - `CODECHAT_POLICY_CLOSE_CODE`: close code meaning "not authorized, do not retry"
//! - `CODECHAT_CONNECT_TIMEOUT_MS`: timeout for a single connection attempt

use std::time::Duration;

use serde::Deserialize;

use codechat_core::ClientId;

use crate::error::{Result, SessionError};
use crate::reconnect::ReconnectPolicy;

/// Path prefix of the streaming chat endpoint.
pub const CHAT_PATH: &str = "/ws/chat";

/// Configuration for a [`TransportSession`](crate::TransportSession).
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Server base URL, e.g. `http://localhost:8000`.
    #[serde(default = "SessionConfig::default_server_url")]
    pub server_url: String,

    /// Maximum consecutive reconnect attempts.
    #[serde(default = "SessionConfig::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds.
    #[serde(default = "SessionConfig::default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Close code that marks an authorization rejection.
    #[serde(default = "SessionConfig::default_policy_close_code")]
    pub policy_close_code: u16,

    /// Timeout for one connection attempt in milliseconds.
    #[serde(default = "SessionConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl SessionConfig {
    fn default_server_url() -> String {
        "http://localhost:8000".to_string()
    }

    const fn default_max_reconnect_attempts() -> u32 {
        5
    }

    const fn default_reconnect_base_delay_ms() -> u64 {
        1000
    }

    const fn default_policy_close_code() -> u16 {
        1008 // policy violation
    }

    const fn default_connect_timeout_ms() -> u64 {
        10_000
    }

    /// Create a configuration for the given server with default tuning.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unset or unparsable values fall back to their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            server_url: lookup("CODECHAT_SERVER").unwrap_or_else(Self::default_server_url),
            max_reconnect_attempts: lookup("CODECHAT_RECONNECT_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(Self::default_max_reconnect_attempts),
            reconnect_base_delay_ms: lookup("CODECHAT_RECONNECT_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(Self::default_reconnect_base_delay_ms),
            policy_close_code: lookup("CODECHAT_POLICY_CLOSE_CODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(Self::default_policy_close_code),
            connect_timeout_ms: lookup("CODECHAT_CONNECT_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(Self::default_connect_timeout_ms),
        }
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reconnect policy derived from this configuration.
    #[must_use]
    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_reconnect_attempts,
            Duration::from_millis(self.reconnect_base_delay_ms),
        )
    }

    /// Build the chat endpoint URL for a client.
    ///
    /// `http` maps to `ws` and `https` to `wss`; websocket schemes are kept.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidEndpoint` for any other scheme.
    pub fn endpoint_for(&self, client_id: &ClientId) -> Result<String> {
        let base = self.server_url.trim_end_matches('/');
        let rest = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("wss://") || base.starts_with("ws://") {
            base.to_string()
        } else {
            return Err(SessionError::InvalidEndpoint(self.server_url.clone()));
        };
        Ok(format!("{rest}{CHAT_PATH}/{client_id}"))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: Self::default_server_url(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
            reconnect_base_delay_ms: Self::default_reconnect_base_delay_ms(),
            policy_close_code: Self::default_policy_close_code(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
        }
    }
}
