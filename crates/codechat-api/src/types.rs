//! Request and response types for the REST API.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use codechat_core::Role;

use crate::error::{ApiError, Result};

/// Models the server accepts.
pub const ALLOWED_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo"];

/// Providers the server accepts.
pub const ALLOWED_PROVIDERS: &[&str] = &["openai", "azure"];

/// Largest accepted `max_tokens`.
pub const MAX_TOKENS_LIMIT: u32 = 4096;

/// Largest accepted temperature.
pub const MAX_TEMPERATURE: f32 = 2.0;

// =============================================================================
// Auth
// =============================================================================

/// Username/password login payload.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

/// Body of a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    /// Always `"success"`.
    pub status: String,
    /// Token to echo in `X-CSRF-Token` on mutating requests.
    pub csrf_token: String,
}

/// Generic `{"status": ...}` acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    /// Outcome label.
    pub status: String,
}

// =============================================================================
// History
// =============================================================================

/// Paging and filtering for the stored transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryQuery {
    /// Page size.
    pub limit: u32,
    /// Messages to skip, newest first.
    pub offset: u32,
    /// Substring the content must contain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            search: None,
        }
    }
}

impl HistoryQuery {
    /// Query matching messages that contain `text`.
    #[must_use]
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            search: Some(text.into()),
            ..Self::default()
        }
    }
}

/// One stored message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryMessage {
    /// Row id.
    pub id: i64,
    /// Author.
    pub role: Role,
    /// Full text.
    pub content: String,
    /// Server-local time the message was stored.
    pub timestamp: NaiveDateTime,
    /// Model that produced an assistant message.
    #[serde(default)]
    pub model: Option<String>,
}

/// A page of stored messages, oldest first.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    /// Messages in chronological order.
    pub messages: Vec<HistoryMessage>,
    /// Number of messages matching the query.
    pub total: u64,
}

// =============================================================================
// Settings
// =============================================================================

/// Generation settings held by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Model name.
    pub model: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// LLM provider.
    pub provider: String,
}

/// Partial settings update. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsUpdate {
    /// New model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// New provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// New token limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// New temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl SettingsUpdate {
    /// Check the update against the values the server accepts.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if let Some(model) = &self.model {
            if !ALLOWED_MODELS.contains(&model.as_str()) {
                return Err(ApiError::Validation(format!(
                    "model must be one of {}",
                    ALLOWED_MODELS.join(", ")
                )));
            }
        }
        if let Some(provider) = &self.provider {
            if !ALLOWED_PROVIDERS.contains(&provider.as_str()) {
                return Err(ApiError::Validation(format!(
                    "provider must be one of {}",
                    ALLOWED_PROVIDERS.join(", ")
                )));
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            if !(1..=MAX_TOKENS_LIMIT).contains(&max_tokens) {
                return Err(ApiError::Validation(format!(
                    "max_tokens must be between 1 and {MAX_TOKENS_LIMIT}"
                )));
            }
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
                return Err(ApiError::Validation(format!(
                    "temperature must be between 0 and {MAX_TEMPERATURE}"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Misc
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    /// `"healthy"` when the server is up.
    pub status: String,
}

impl HealthResponse {
    /// Whether the server reported itself healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Error body produced by the server framework.
///
/// `detail` is a string for handled errors and a list of field errors for
/// rejected payloads.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    pub(crate) fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_query_defaults() {
        let query = HistoryQuery::default();
        assert_eq!(query.limit, 50);
        assert_eq!(query.offset, 0);
        assert!(query.search.is_none());
    }

    #[test]
    fn history_message_parses_naive_timestamp() {
        let json = r#"{
            "id": 7,
            "role": "assistant",
            "content": "hi",
            "timestamp": "2024-05-01T10:20:30.123456",
            "model": "gpt-4o-mini"
        }"#;
        let msg: HistoryMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.timestamp.to_string(), "2024-05-01 10:20:30.123456");
        assert_eq!(msg.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn history_message_model_is_optional() {
        let json = r#"{"id":1,"role":"user","content":"x","timestamp":"2024-05-01T10:20:30"}"#;
        let msg: HistoryMessage = serde_json::from_str(json).unwrap();
        assert!(msg.model.is_none());
    }

    #[test]
    fn settings_update_skips_unset_fields() {
        let update = SettingsUpdate {
            temperature: Some(0.5),
            ..SettingsUpdate::default()
        };
        assert_eq!(
            serde_json::to_string(&update).unwrap(),
            r#"{"temperature":0.5}"#
        );
    }

    #[test]
    fn validate_accepts_boundaries() {
        let update = SettingsUpdate {
            model: Some("gpt-4-turbo".to_string()),
            provider: Some("azure".to_string()),
            max_tokens: Some(4096),
            temperature: Some(0.0),
        };
        assert!(update.validate().is_ok());
        assert!(SettingsUpdate::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let cases = [
            SettingsUpdate {
                model: Some("gpt-3".to_string()),
                ..SettingsUpdate::default()
            },
            SettingsUpdate {
                provider: Some("local".to_string()),
                ..SettingsUpdate::default()
            },
            SettingsUpdate {
                max_tokens: Some(0),
                ..SettingsUpdate::default()
            },
            SettingsUpdate {
                max_tokens: Some(4097),
                ..SettingsUpdate::default()
            },
            SettingsUpdate {
                temperature: Some(2.5),
                ..SettingsUpdate::default()
            },
            SettingsUpdate {
                temperature: Some(-0.1),
                ..SettingsUpdate::default()
            },
        ];
        for update in cases {
            assert!(
                matches!(update.validate(), Err(ApiError::Validation(_))),
                "{update:?} should be rejected"
            );
        }
    }

    #[test]
    fn error_body_message_handles_both_shapes() {
        let plain: ErrorBody = serde_json::from_str(r#"{"detail":"Not authenticated"}"#).unwrap();
        assert_eq!(plain.message(), "Not authenticated");

        let list: ErrorBody =
            serde_json::from_str(r#"{"detail":[{"loc":["body","max_tokens"]}]}"#).unwrap();
        assert!(list.message().contains("max_tokens"));
    }
}
