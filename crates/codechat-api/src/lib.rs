//! REST client for the codechat server.
//!
//! Covers everything outside the streaming connection: login and logout,
//! stored chat history, and the server's generation settings.
//!
//! The server authenticates with a `session_token` cookie and expects the
//! CSRF token returned by login in an `X-CSRF-Token` header on mutating
//! requests. [`ApiClient`] keeps both after [`ApiClient::login`] and exposes
//! the session token so the websocket connection can present it too.
//!
//! # Example
//!
//! ```no_run
//! use codechat_api::{ApiClient, HistoryQuery};
//!
//! # async fn example() -> Result<(), codechat_api::ApiError> {
//! let client = ApiClient::new("http://localhost:8000")?;
//! client.login("admin", "secret").await?;
//! let page = client.history(&HistoryQuery::default()).await?;
//! println!("{} of {} messages", page.messages.len(), page.total);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod types;

pub use client::{ApiClient, CSRF_HEADER, SESSION_COOKIE};
pub use error::{ApiError, Result};
pub use types::{
    HealthResponse, HistoryMessage, HistoryPage, HistoryQuery, ServerSettings, SettingsUpdate,
    ALLOWED_MODELS, ALLOWED_PROVIDERS, MAX_TEMPERATURE, MAX_TOKENS_LIMIT,
};
