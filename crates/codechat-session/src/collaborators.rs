//! Interfaces to the pieces the session depends on but does not own.

use codechat_core::{GenerationParams, Role};

/// Rendering contract for the chat transcript.
///
/// `set_message_text` always receives the full text of the message being
/// built, never a delta.
pub trait Presentation {
    /// Start a new message bubble for `role`.
    fn begin_message(&mut self, role: Role);

    /// Replace the text of the message being built.
    fn set_message_text(&mut self, full_text: &str);

    /// Mark the message being built as complete.
    fn finalize_message(&mut self);

    /// Show an error notice in the transcript.
    fn show_error(&mut self, text: &str);

    /// Remove every message from the transcript.
    fn clear_all(&mut self);

    /// Toggle the "generation in progress" indicator.
    fn set_generating(&mut self, _generating: bool) {}
}

/// Source of the sampling parameters for each outgoing message.
pub trait GenerationSettings {
    /// Parameters to attach to the next message.
    fn generation_params(&self) -> GenerationParams;
}

impl GenerationSettings for GenerationParams {
    fn generation_params(&self) -> GenerationParams {
        *self
    }
}

/// Source of the session credential presented when connecting.
pub trait CredentialProvider: Send + Sync {
    /// The current session token, if logged in.
    fn credential(&self) -> Option<String>;
}

/// A credential that never changes.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(pub Option<String>);

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use recording::{Call, RecordingPresentation};

#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use codechat_core::Role;

    use super::Presentation;

    /// One call made on a [`RecordingPresentation`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        /// `begin_message`.
        Begin(Role),
        /// `set_message_text`.
        SetText(String),
        /// `finalize_message`.
        Finalize,
        /// `show_error`.
        Error(String),
        /// `clear_all`.
        ClearAll,
        /// `set_generating`.
        Generating(bool),
    }

    /// Presentation that records every call in order.
    #[derive(Debug, Default)]
    pub struct RecordingPresentation {
        /// Calls received so far.
        pub calls: Vec<Call>,
    }

    impl RecordingPresentation {
        /// Drain the recorded calls.
        pub fn take(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl Presentation for RecordingPresentation {
        fn begin_message(&mut self, role: Role) {
            self.calls.push(Call::Begin(role));
        }

        fn set_message_text(&mut self, full_text: &str) {
            self.calls.push(Call::SetText(full_text.to_string()));
        }

        fn finalize_message(&mut self) {
            self.calls.push(Call::Finalize);
        }

        fn show_error(&mut self, text: &str) {
            self.calls.push(Call::Error(text.to_string()));
        }

        fn clear_all(&mut self) {
            self.calls.push(Call::ClearAll);
        }

        fn set_generating(&mut self, generating: bool) {
            self.calls.push(Call::Generating(generating));
        }
    }
}
