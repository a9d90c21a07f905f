//! Incremental assembly of streamed assistant responses.
//!
//! The server answers one user message with any number of `content` deltas
//! followed by `done`, or with `error`. The assembler turns that sequence
//! into presentation calls: the first delta opens an assistant message, every
//! delta replaces its text with the full accumulation, and `done` or `error`
//! closes it exactly once.
//!
//! A local abort closes the turn immediately and leaves a tombstone. The
//! server still finishes the aborted turn: leftover deltas, then `done`,
//! `error` followed by `done`, or a lone `error` when generation failed. The
//! first `done` or `error` of the aborted turn consumes the tombstone. A `done`
//! arriving right after an `error` consumed a tombstone belongs to the same
//! turn and is dropped as well, unless the next turn has already started
//! streaming. Tombstones are cleared when the connection is lost, since the
//! server forgets the turn with the connection.

use codechat_core::{IncomingEnvelope, Role};

use crate::collaborators::Presentation;
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Turn {
    /// No response outstanding.
    Idle,
    /// A message was sent and no delta has arrived yet.
    Awaiting,
    /// Deltas are arriving.
    Streaming { text: String },
}

/// State machine building assistant messages from streamed envelopes.
#[derive(Debug)]
pub struct StreamAssembler {
    turn: Turn,
    generating: bool,
    aborted_turns: u32,
    /// An aborted turn ended with `error`; its `done` may still follow.
    trailing_done: bool,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    /// Create an idle assembler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            turn: Turn::Idle,
            generating: false,
            aborted_turns: 0,
            trailing_done: false,
        }
    }

    /// Whether a response is outstanding.
    #[must_use]
    pub const fn is_generating(&self) -> bool {
        self.generating
    }

    /// Text accumulated so far for the message being streamed.
    #[must_use]
    pub fn partial_text(&self) -> Option<&str> {
        match &self.turn {
            Turn::Streaming { text } => Some(text),
            Turn::Idle | Turn::Awaiting => None,
        }
    }

    /// Number of aborted turns whose closing `done` or `error` is still expected.
    #[must_use]
    pub const fn pending_tombstones(&self) -> u32 {
        self.aborted_turns
    }

    /// Echo a user message and expect a response.
    pub fn on_user_send<P: Presentation + ?Sized>(&mut self, ui: &mut P, text: &str) {
        if let Turn::Streaming { .. } = self.turn {
            ui.finalize_message();
        }

        ui.begin_message(Role::User);
        ui.set_message_text(text);
        ui.finalize_message();

        self.turn = Turn::Awaiting;
        self.set_generating(ui, true);
    }

    /// The user message never left the client.
    pub fn on_send_failed<P: Presentation + ?Sized>(&mut self, ui: &mut P) {
        if self.turn == Turn::Awaiting {
            self.turn = Turn::Idle;
        }
        self.set_generating(ui, false);
    }

    /// Apply one inbound envelope.
    pub fn on_envelope<P: Presentation + ?Sized>(&mut self, ui: &mut P, envelope: &IncomingEnvelope) {
        let trailing_done = std::mem::take(&mut self.trailing_done);
        match envelope {
            IncomingEnvelope::Done if trailing_done && self.partial_text().is_none() => {
                tracing::debug!("Dropping done of aborted turn");
            }
            IncomingEnvelope::Content { data } => self.on_content(ui, data),
            IncomingEnvelope::Done => self.on_done(ui),
            IncomingEnvelope::Error { error } => self.on_error(ui, error),
            IncomingEnvelope::Unknown => {}
        }
    }

    fn on_content<P: Presentation + ?Sized>(&mut self, ui: &mut P, data: &str) {
        if self.aborted_turns > 0 {
            tracing::trace!(len = data.len(), "Dropping delta for aborted turn");
            return;
        }

        if let Turn::Streaming { text } = &mut self.turn {
            text.push_str(data);
        } else {
            ui.begin_message(Role::Assistant);
            self.turn = Turn::Streaming {
                text: data.to_string(),
            };
        }

        if let Turn::Streaming { text } = &self.turn {
            ui.set_message_text(text);
        }
        self.set_generating(ui, true);
    }

    fn on_done<P: Presentation + ?Sized>(&mut self, ui: &mut P) {
        if self.aborted_turns > 0 {
            self.aborted_turns -= 1;
            tracing::debug!(remaining = self.aborted_turns, "Aborted turn finished");
            return;
        }

        if let Turn::Streaming { text } = &self.turn {
            tracing::debug!(len = text.len(), "Response complete");
            ui.finalize_message();
        }
        self.turn = Turn::Idle;
        self.set_generating(ui, false);
    }

    fn on_error<P: Presentation + ?Sized>(&mut self, ui: &mut P, error: &str) {
        if self.aborted_turns > 0 {
            self.aborted_turns -= 1;
            self.trailing_done = true;
            tracing::debug!(
                error = %error,
                remaining = self.aborted_turns,
                "Aborted turn ended with error"
            );
            return;
        }

        let failure = SessionError::Generation(error.to_string());
        tracing::warn!(error = %failure, "Response failed");
        if let Turn::Streaming { .. } = self.turn {
            ui.finalize_message();
        }
        ui.show_error(error);
        self.turn = Turn::Idle;
        self.set_generating(ui, false);
    }

    /// Stop the current turn locally, before the server confirms anything.
    pub fn on_local_abort<P: Presentation + ?Sized>(&mut self, ui: &mut P) {
        match std::mem::replace(&mut self.turn, Turn::Idle) {
            Turn::Idle => {}
            Turn::Awaiting => self.aborted_turns += 1,
            Turn::Streaming { .. } => {
                ui.finalize_message();
                self.aborted_turns += 1;
            }
        }
        self.set_generating(ui, false);
    }

    /// The connection dropped; the server will not finish any turn.
    ///
    /// Returns `true` if a turn was cut short, after showing `notice`.
    pub fn on_connection_interrupted<P: Presentation + ?Sized>(
        &mut self,
        ui: &mut P,
        notice: &str,
    ) -> bool {
        self.aborted_turns = 0;
        self.trailing_done = false;
        let interrupted = match std::mem::replace(&mut self.turn, Turn::Idle) {
            Turn::Idle => false,
            Turn::Awaiting => true,
            Turn::Streaming { .. } => {
                ui.finalize_message();
                true
            }
        };
        if interrupted {
            ui.show_error(notice);
        }
        self.set_generating(ui, false);
        interrupted
    }

    fn set_generating<P: Presentation + ?Sized>(&mut self, ui: &mut P, generating: bool) {
        if self.generating != generating {
            self.generating = generating;
            ui.set_generating(generating);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Call, RecordingPresentation};

    fn content(data: &str) -> IncomingEnvelope {
        IncomingEnvelope::Content {
            data: data.to_string(),
        }
    }

    fn error(text: &str) -> IncomingEnvelope {
        IncomingEnvelope::Error {
            error: text.to_string(),
        }
    }

    fn sent(ui: &mut RecordingPresentation, assembler: &mut StreamAssembler, text: &str) {
        assembler.on_user_send(ui, text);
        assert_eq!(
            ui.take(),
            vec![
                Call::Begin(Role::User),
                Call::SetText(text.to_string()),
                Call::Finalize,
                Call::Generating(true),
            ]
        );
    }

    #[test]
    fn deltas_accumulate_into_one_message() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "hi");

        for env in [content("Hel"), content("lo"), IncomingEnvelope::Done] {
            assembler.on_envelope(&mut ui, &env);
        }

        assert_eq!(
            ui.take(),
            vec![
                Call::Begin(Role::Assistant),
                Call::SetText("Hel".to_string()),
                Call::SetText("Hello".to_string()),
                Call::Finalize,
                Call::Generating(false),
            ]
        );
        assert!(!assembler.is_generating());
        assert_eq!(assembler.partial_text(), None);
    }

    #[test]
    fn finalized_text_is_concatenation_of_deltas() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        assembler.on_user_send(&mut ui, "q");

        let deltas = ["fn ", "main", "() ", "{}", "\n"];
        for d in deltas {
            assembler.on_envelope(&mut ui, &content(d));
        }
        assert_eq!(assembler.partial_text(), Some(deltas.concat().as_str()));

        assembler.on_envelope(&mut ui, &IncomingEnvelope::Done);
        let last_text = ui
            .calls
            .iter()
            .rev()
            .find_map(|c| match c {
                Call::SetText(t) => Some(t.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_text, deltas.concat());
        assert_eq!(
            ui.calls.iter().filter(|c| **c == Call::Finalize).count(),
            2,
            "user echo and assistant message are each finalized once"
        );
    }

    #[test]
    fn error_keeps_partial_text() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "hi");

        assembler.on_envelope(&mut ui, &content("partial"));
        assembler.on_envelope(&mut ui, &error("rate limited"));

        assert_eq!(
            ui.take(),
            vec![
                Call::Begin(Role::Assistant),
                Call::SetText("partial".to_string()),
                Call::Finalize,
                Call::Error("rate limited".to_string()),
                Call::Generating(false),
            ]
        );
    }

    #[test]
    fn error_before_any_delta_only_shows_error() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "hi");

        assembler.on_envelope(&mut ui, &error("model unavailable"));
        assert_eq!(
            ui.take(),
            vec![
                Call::Error("model unavailable".to_string()),
                Call::Generating(false),
            ]
        );
    }

    #[test]
    fn abort_before_content_drops_the_rest_of_the_turn() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "hi");

        assembler.on_local_abort(&mut ui);
        assert_eq!(ui.take(), vec![Call::Generating(false)]);
        assert!(!assembler.is_generating());

        for env in [
            content("stray"),
            error("Generation aborted"),
            IncomingEnvelope::Done,
        ] {
            assembler.on_envelope(&mut ui, &env);
        }
        assert!(ui.take().is_empty());
        assert_eq!(assembler.pending_tombstones(), 0);

        // The next turn renders normally.
        sent(&mut ui, &mut assembler, "again");
        assembler.on_envelope(&mut ui, &content("ok"));
        assert_eq!(
            ui.take(),
            vec![Call::Begin(Role::Assistant), Call::SetText("ok".to_string())]
        );
    }

    #[test]
    fn abort_mid_stream_keeps_partial_and_ignores_leftovers() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "hi");

        assembler.on_envelope(&mut ui, &content("Once upon"));
        ui.take();

        assembler.on_local_abort(&mut ui);
        assert_eq!(ui.take(), vec![Call::Finalize, Call::Generating(false)]);

        assembler.on_envelope(&mut ui, &content(" a time"));
        assert!(ui.take().is_empty());
    }

    #[test]
    fn new_turn_waits_behind_aborted_turns_done() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "first");
        assembler.on_local_abort(&mut ui);
        assert_eq!(ui.take(), vec![Call::Generating(false)]);
        sent(&mut ui, &mut assembler, "second");

        // Leftovers of the first turn, then the second turn.
        for env in [
            content("old"),
            IncomingEnvelope::Done,
            content("new"),
            IncomingEnvelope::Done,
        ] {
            assembler.on_envelope(&mut ui, &env);
        }

        assert_eq!(
            ui.take(),
            vec![
                Call::Begin(Role::Assistant),
                Call::SetText("new".to_string()),
                Call::Finalize,
                Call::Generating(false),
            ]
        );
    }

    fn reply_renders(ui: &mut RecordingPresentation, assembler: &mut StreamAssembler) {
        sent(ui, assembler, "second");
        assembler.on_envelope(ui, &content("answer"));
        assembler.on_envelope(ui, &IncomingEnvelope::Done);
        assert_eq!(
            ui.take(),
            vec![
                Call::Begin(Role::Assistant),
                Call::SetText("answer".to_string()),
                Call::Finalize,
                Call::Generating(false),
            ]
        );
        assert!(!assembler.is_generating());
    }

    #[test]
    fn aborted_turn_ending_in_lone_error_releases_next_turn() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "first");
        assembler.on_local_abort(&mut ui);
        assembler.on_envelope(&mut ui, &error("Error: rate limited"));
        assert_eq!(ui.take(), vec![Call::Generating(false)]);
        assert_eq!(assembler.pending_tombstones(), 0);

        reply_renders(&mut ui, &mut assembler);
    }

    #[test]
    fn aborted_turn_ending_in_error_then_done_is_fully_dropped() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "first");
        assembler.on_local_abort(&mut ui);
        for env in [error("Generation aborted"), IncomingEnvelope::Done] {
            assembler.on_envelope(&mut ui, &env);
        }
        assert_eq!(ui.take(), vec![Call::Generating(false)]);

        reply_renders(&mut ui, &mut assembler);
    }

    #[test]
    fn trailing_done_is_dropped_after_next_turn_was_sent() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "first");
        assembler.on_local_abort(&mut ui);
        ui.take();
        sent(&mut ui, &mut assembler, "second");

        for env in [
            error("Generation aborted"),
            IncomingEnvelope::Done,
            content("answer"),
            IncomingEnvelope::Done,
        ] {
            assembler.on_envelope(&mut ui, &env);
        }
        assert_eq!(
            ui.take(),
            vec![
                Call::Begin(Role::Assistant),
                Call::SetText("answer".to_string()),
                Call::Finalize,
                Call::Generating(false),
            ]
        );
    }

    #[test]
    fn repeated_aborts_stay_in_step() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        for _ in 0..3 {
            sent(&mut ui, &mut assembler, "first");
            assembler.on_local_abort(&mut ui);
            assembler.on_envelope(&mut ui, &error("Error: upstream timeout"));
            ui.take();
        }
        assert_eq!(assembler.pending_tombstones(), 0);

        reply_renders(&mut ui, &mut assembler);
    }

    #[test]
    fn abort_when_idle_leaves_no_tombstone() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        assembler.on_local_abort(&mut ui);
        assert_eq!(assembler.pending_tombstones(), 0);
        assert!(ui.take().is_empty());
    }

    #[test]
    fn connection_loss_finalizes_partial_and_clears_tombstones() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "a");
        assembler.on_local_abort(&mut ui);
        ui.take();
        sent(&mut ui, &mut assembler, "b");
        assert_eq!(assembler.pending_tombstones(), 1);

        assert!(assembler.on_connection_interrupted(&mut ui, "connection lost"));
        assert_eq!(
            ui.take(),
            vec![
                Call::Error("connection lost".to_string()),
                Call::Generating(false)
            ]
        );
        assert_eq!(assembler.pending_tombstones(), 0);

        assert!(!assembler.on_connection_interrupted(&mut ui, "connection lost"));
        assert!(ui.take().is_empty());
    }

    #[test]
    fn unsolicited_content_opens_a_message() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        assembler.on_envelope(&mut ui, &content("hello"));
        assert_eq!(
            ui.take(),
            vec![
                Call::Begin(Role::Assistant),
                Call::SetText("hello".to_string()),
                Call::Generating(true),
            ]
        );
    }

    #[test]
    fn done_without_accumulator_only_leaves_generating() {
        let mut ui = RecordingPresentation::default();
        let mut assembler = StreamAssembler::new();
        sent(&mut ui, &mut assembler, "hi");
        assembler.on_envelope(&mut ui, &IncomingEnvelope::Done);
        assert_eq!(ui.take(), vec![Call::Generating(false)]);
    }
}
