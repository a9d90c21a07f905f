//! Streaming chat session for codechat.
//!
//! This crate owns the long-lived connection to the chat server and turns its
//! token-by-token output into finished messages:
//!
//! - [`TransportSession`]: connection lifecycle, framing, linear-backoff
//!   reconnects and typed event subscription
//! - [`StreamAssembler`]: incremental assembly of streamed responses, with
//!   error and abort handling
//! - [`ChatController`]: glue between the transport, the assembler and the
//!   [`Presentation`] layer
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  commands   ┌──────────────────┐   Link    ┌──────────────┐
//! │ TransportSession │────────────▶│   driver task    │◀─────────▶│  Connector   │
//! │   (handle)       │◀────────────│ (owns connection)│           │ (tungstenite)│
//! └──────────────────┘   events    └──────────────────┘           └──────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐             ┌──────────────────┐
//! │  ChatController  │────────────▶│ StreamAssembler  │──▶ Presentation
//! └──────────────────┘             └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use codechat_session::{SessionConfig, StaticCredential, TransportSession, WsConnector};
//!
//! # async fn example() -> Result<(), codechat_session::SessionError> {
//! let config = SessionConfig::new("http://localhost:8000");
//! let session = TransportSession::new(
//!     &config,
//!     Arc::new(WsConnector),
//!     Arc::new(StaticCredential(Some("session-token".to_string()))),
//! )?;
//! let mut events = session.event_stream();
//! session.connect().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod assembler;
pub mod collaborators;
pub mod config;
pub mod connector;
pub mod controller;
pub mod error;
pub mod events;
pub mod reconnect;
pub mod state;
pub mod transport;

pub use assembler::StreamAssembler;
pub use collaborators::{CredentialProvider, GenerationSettings, Presentation, StaticCredential};
pub use config::SessionConfig;
pub use connector::{
    ConnectTarget, Connector, InboundFrame, Link, OutboundFrame, RemoteEnd, WsConnector,
};
pub use controller::ChatController;
pub use error::{ChatError, Result, SessionError};
pub use events::{EventKind, Listeners, SessionEvent, SubscriptionId, TerminalReason};
pub use reconnect::ReconnectPolicy;
pub use state::{Closure, ConnectionState};
pub use transport::TransportSession;

#[cfg(any(test, feature = "test-utils"))]
pub use collaborators::{Call, RecordingPresentation};
#[cfg(any(test, feature = "test-utils"))]
pub use connector::{Script, ScriptedConnector};
