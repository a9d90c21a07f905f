//! Core types shared by every codechat crate.
//!
//! - **Identifiers**: the per-session [`ClientId`] embedded in the chat endpoint
//! - **Protocol**: the JSON envelopes exchanged over the streaming connection
//! - **Commands**: slash-command parsing and command palette filtering
//! - **Error types**: decoding and identifier errors
//!
//! # Example
//!
//! ```
//! use codechat_core::{GenerationParams, IncomingEnvelope, OutgoingEnvelope};
//!
//! let outgoing = OutgoingEnvelope::message("hello", None, GenerationParams::default());
//! assert!(outgoing.to_json().unwrap().contains(r#""type":"message""#));
//!
//! let incoming = IncomingEnvelope::from_json(r#"{"type":"content","data":"Hel"}"#).unwrap();
//! assert_eq!(incoming, IncomingEnvelope::Content { data: "Hel".to_string() });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod command;
pub mod error;
pub mod ids;
pub mod protocol;

pub use command::{filter_by_prefix, parse_input, CommandSpec, ParsedInput, SERVER_COMMANDS};
pub use error::{CoreError, Result};
pub use ids::{ClientId, IdError};
pub use protocol::{GenerationParams, IncomingEnvelope, OutgoingEnvelope, Role};
