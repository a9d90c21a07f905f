//! Chat controller tying the transport, the assembler and the UI together.

use codechat_core::{parse_input, OutgoingEnvelope, ParsedInput, Role};

use crate::assembler::StreamAssembler;
use crate::collaborators::{GenerationSettings, Presentation};
use crate::error::{ChatError, SessionError};
use crate::events::{SessionEvent, TerminalReason};
use crate::transport::TransportSession;

const NOT_CONNECTED_NOTICE: &str = "Not connected to the server; the message was not sent.";
const INTERRUPTED_NOTICE: &str = "Connection interrupted; the response was cut short.";

/// Drives one chat conversation.
///
/// Owns the presentation and the settings source; events from the
/// transport are fed in through [`handle_event`](Self::handle_event).
pub struct ChatController<P, S> {
    transport: TransportSession,
    assembler: StreamAssembler,
    presentation: P,
    settings: S,
}

impl<P: Presentation, S: GenerationSettings> ChatController<P, S> {
    /// Create a controller.
    pub const fn new(transport: TransportSession, presentation: P, settings: S) -> Self {
        Self {
            transport,
            assembler: StreamAssembler::new(),
            presentation,
            settings,
        }
    }

    /// The transport session.
    #[must_use]
    pub const fn transport(&self) -> &TransportSession {
        &self.transport
    }

    /// The presentation layer.
    #[must_use]
    pub const fn presentation(&self) -> &P {
        &self.presentation
    }

    /// Mutable access to the presentation layer.
    pub fn presentation_mut(&mut self) -> &mut P {
        &mut self.presentation
    }

    /// The settings source.
    #[must_use]
    pub const fn settings(&self) -> &S {
        &self.settings
    }

    /// Mutable access to the settings source.
    pub fn settings_mut(&mut self) -> &mut S {
        &mut self.settings
    }

    /// Whether a response is outstanding.
    #[must_use]
    pub const fn is_generating(&self) -> bool {
        self.assembler.is_generating()
    }

    /// Parse raw input and send it.
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message); blank input yields
    /// `ChatError::EmptyInput`.
    pub async fn send_input(&mut self, raw: &str) -> Result<(), ChatError> {
        let input = parse_input(raw).ok_or(ChatError::EmptyInput)?;
        self.send_message(input).await
    }

    /// Echo the message locally, then send it with the current settings.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::TurnInProgress` while a response is streaming, or
    /// the transport error if the message could not be sent. In the latter
    /// case the error is also shown in the transcript.
    pub async fn send_message(&mut self, input: ParsedInput) -> Result<(), ChatError> {
        if self.assembler.is_generating() {
            return Err(ChatError::TurnInProgress);
        }

        self.assembler
            .on_user_send(&mut self.presentation, &input.display_text());

        let envelope = OutgoingEnvelope::message(
            input.content,
            input.command,
            self.settings.generation_params(),
        );

        if let Err(err) = self.transport.send(&envelope).await {
            tracing::warn!(error = %err, "Message not sent");
            self.assembler.on_send_failed(&mut self.presentation);
            let notice = match err {
                SessionError::NotConnected => NOT_CONNECTED_NOTICE.to_string(),
                ref other => other.to_string(),
            };
            self.presentation.show_error(&notice);
            return Err(err.into());
        }
        Ok(())
    }

    /// Stop the current response.
    ///
    /// The UI leaves generating mode before anything is sent. The `abort`
    /// envelope is best effort; failing to send it is only logged.
    pub async fn abort(&mut self) {
        if !self.assembler.is_generating() {
            return;
        }
        self.assembler.on_local_abort(&mut self.presentation);

        if let Err(err) = self.transport.send(&OutgoingEnvelope::Abort).await {
            tracing::debug!(error = %err, "Abort not delivered");
        }
    }

    /// React to one transport event.
    pub fn handle_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Open => tracing::debug!("Chat connection ready"),
            SessionEvent::Message(envelope) => {
                self.assembler.on_envelope(&mut self.presentation, envelope);
            }
            SessionEvent::Error(err) => {
                tracing::debug!(error = %err, "Transport error");
                self.assembler
                    .on_connection_interrupted(&mut self.presentation, INTERRUPTED_NOTICE);
            }
            SessionEvent::Reconnecting { attempt, delay } => {
                tracing::debug!(attempt, delay = ?delay, "Reconnecting");
                self.assembler
                    .on_connection_interrupted(&mut self.presentation, INTERRUPTED_NOTICE);
            }
            SessionEvent::ClosedPermanently(reason) => {
                self.assembler
                    .on_connection_interrupted(&mut self.presentation, INTERRUPTED_NOTICE);
                match reason {
                    TerminalReason::Rejected { .. } => self
                        .presentation
                        .show_error("The server rejected this session. Please log in again."),
                    TerminalReason::RetriesExhausted { .. } => {
                        let notice = format!("{}. Reconnect to continue.", reason.to_error());
                        self.presentation.show_error(&notice);
                    }
                    TerminalReason::ClientClosed => {}
                }
            }
        }
    }

    /// Replay stored messages into the transcript.
    pub fn render_history<'a>(&mut self, messages: impl IntoIterator<Item = (Role, &'a str)>) {
        for (role, text) in messages {
            self.presentation.begin_message(role);
            self.presentation.set_message_text(text);
            self.presentation.finalize_message();
        }
    }

    /// Remove every message from the transcript.
    pub fn clear_transcript(&mut self) {
        self.presentation.clear_all();
    }
}

impl<P, S> std::fmt::Debug for ChatController<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatController")
            .field("transport", &self.transport)
            .field("assembler", &self.assembler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use codechat_core::{ClientId, GenerationParams};

    use super::*;
    use crate::collaborators::{Call, RecordingPresentation, StaticCredential};
    use crate::config::SessionConfig;
    use crate::connector::{OutboundFrame, RemoteEnd, Script, ScriptedConnector};

    type Controller = ChatController<RecordingPresentation, GenerationParams>;

    async fn connected() -> (
        Controller,
        RemoteEnd,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (connector, mut remotes) = ScriptedConnector::new([Script::Accept]);
        let transport = TransportSession::with_client_id(
            ClientId::from_parts(7, "zzzzzzzzz").unwrap(),
            &SessionConfig::default(),
            Arc::new(connector),
            Arc::new(StaticCredential::default()),
        )
        .unwrap();
        let mut events = transport.event_stream();
        transport.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::Open));
        let remote = remotes.recv().await.unwrap();

        let params = GenerationParams {
            temperature: 0.2,
            max_tokens: 512,
        };
        let controller = ChatController::new(transport, RecordingPresentation::default(), params);
        (controller, remote, events)
    }

    async fn pump(controller: &mut Controller, events: &mut mpsc::UnboundedReceiver<SessionEvent>, n: usize) {
        for _ in 0..n {
            let event = events.recv().await.unwrap();
            controller.handle_event(&event);
        }
    }

    fn sent_json(remote: &mut RemoteEnd) -> serde_json::Value {
        match remote.from_client.try_recv() {
            Ok(OutboundFrame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streams_a_reply() {
        let (mut controller, mut remote, mut events) = connected().await;

        controller.send_input("/explain fn main() {}").await.unwrap();
        let frame = sent_json(&mut remote);
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["command"], "/explain");
        assert_eq!(frame["content"], "fn main() {}");
        assert_eq!(frame["max_tokens"], 512);

        remote.send_text(r#"{"type":"content","data":"Hel","error":null}"#);
        remote.send_text(r#"{"type":"content","data":"lo","error":null}"#);
        remote.send_text(r#"{"type":"done","data":null,"error":null}"#);
        pump(&mut controller, &mut events, 3).await;

        assert_eq!(
            controller.presentation_mut().take(),
            vec![
                Call::Begin(Role::User),
                Call::SetText("/explain fn main() {}".to_string()),
                Call::Finalize,
                Call::Generating(true),
                Call::Begin(Role::Assistant),
                Call::SetText("Hel".to_string()),
                Call::SetText("Hello".to_string()),
                Call::Finalize,
                Call::Generating(false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_second_message_while_generating() {
        let (mut controller, mut remote, _events) = connected().await;
        controller.send_input("one").await.unwrap();
        let _ = sent_json(&mut remote);

        assert_eq!(
            controller.send_input("two").await,
            Err(ChatError::TurnInProgress)
        );
        assert!(remote.from_client.try_recv().is_err());
        assert_eq!(controller.send_input("  ").await, Err(ChatError::EmptyInput));
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_reports_error() {
        let (mut controller, remote, mut events) = connected().await;
        remote.close(1006, "");
        pump(&mut controller, &mut events, 1).await;
        controller.presentation_mut().take();

        let result = controller.send_input("hello?").await;
        assert_eq!(result, Err(ChatError::Session(SessionError::NotConnected)));
        assert_eq!(
            controller.presentation_mut().take(),
            vec![
                Call::Begin(Role::User),
                Call::SetText("hello?".to_string()),
                Call::Finalize,
                Call::Generating(true),
                Call::Generating(false),
                Call::Error(NOT_CONNECTED_NOTICE.to_string()),
            ]
        );
        assert!(!controller.is_generating());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_leaves_generating_before_send() {
        let (mut controller, mut remote, mut events) = connected().await;
        controller.send_input("tell me a story").await.unwrap();
        let _ = sent_json(&mut remote);
        controller.presentation_mut().take();

        controller.abort().await;
        assert!(!controller.is_generating());
        assert_eq!(
            controller.presentation_mut().take(),
            vec![Call::Generating(false)]
        );
        assert_eq!(sent_json(&mut remote)["type"], "abort");

        remote.send_text(r#"{"type":"content","data":"Once","error":null}"#);
        remote.send_text(r#"{"type":"error","data":null,"error":"Generation aborted"}"#);
        remote.send_text(r#"{"type":"done","data":null,"error":null}"#);
        pump(&mut controller, &mut events, 3).await;
        assert!(controller.presentation_mut().take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn next_message_streams_after_aborted_turn_failed() {
        let (mut controller, mut remote, mut events) = connected().await;
        controller.send_input("first").await.unwrap();
        let _ = sent_json(&mut remote);
        controller.abort().await;
        let _ = sent_json(&mut remote);

        remote.send_text(r#"{"type":"error","data":null,"error":"Error: rate limited"}"#);
        pump(&mut controller, &mut events, 1).await;
        controller.presentation_mut().take();

        controller.send_input("second").await.unwrap();
        let _ = sent_json(&mut remote);
        remote.send_text(r#"{"type":"content","data":"answer","error":null}"#);
        remote.send_text(r#"{"type":"done","data":null,"error":null}"#);
        pump(&mut controller, &mut events, 2).await;

        let calls = controller.presentation_mut().take();
        assert!(calls.contains(&Call::SetText("answer".to_string())));
        assert_eq!(calls.last(), Some(&Call::Generating(false)));
        assert!(!controller.is_generating());
        assert!(controller.send_input("third").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_without_connection_is_local_only() {
        let (mut controller, mut remote, mut events) = connected().await;
        controller.send_input("hi").await.unwrap();
        let _ = sent_json(&mut remote);

        remote.close(1006, "");
        pump(&mut controller, &mut events, 1).await;
        assert!(!controller.is_generating());

        controller.abort().await;
        assert!(!controller.is_generating());
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_keeps_partial_and_connection() {
        let (mut controller, mut remote, mut events) = connected().await;
        controller.send_input("hi").await.unwrap();
        let _ = sent_json(&mut remote);
        controller.presentation_mut().take();

        remote.send_text(r#"{"type":"content","data":"partial","error":null}"#);
        remote.send_text(r#"{"type":"error","data":null,"error":"rate limited"}"#);
        pump(&mut controller, &mut events, 2).await;

        assert_eq!(
            controller.presentation_mut().take(),
            vec![
                Call::Begin(Role::Assistant),
                Call::SetText("partial".to_string()),
                Call::Finalize,
                Call::Error("rate limited".to_string()),
                Call::Generating(false),
            ]
        );
        assert!(controller.transport().state().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn connection_drop_mid_turn_finalizes_partial() {
        let (mut controller, mut remote, mut events) = connected().await;
        controller.send_input("hi").await.unwrap();
        let _ = sent_json(&mut remote);
        controller.presentation_mut().take();

        remote.send_text(r#"{"type":"content","data":"half","error":null}"#);
        remote.close(1006, "");
        pump(&mut controller, &mut events, 2).await;

        assert_eq!(
            controller.presentation_mut().take(),
            vec![
                Call::Begin(Role::Assistant),
                Call::SetText("half".to_string()),
                Call::Finalize,
                Call::Error(INTERRUPTED_NOTICE.to_string()),
                Call::Generating(false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_asks_for_login() {
        let (mut controller, remote, mut events) = connected().await;
        remote.close(1008, "invalid session");
        pump(&mut controller, &mut events, 1).await;

        let calls = controller.presentation_mut().take();
        assert!(matches!(&calls[..], [Call::Error(text)] if text.contains("log in")));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn history_replays_through_presentation() {
        let (mut controller, _remote, _events) = connected().await;
        controller.render_history([(Role::User, "q"), (Role::Assistant, "a")]);
        controller.clear_transcript();

        assert_eq!(
            controller.presentation_mut().take(),
            vec![
                Call::Begin(Role::User),
                Call::SetText("q".to_string()),
                Call::Finalize,
                Call::Begin(Role::Assistant),
                Call::SetText("a".to_string()),
                Call::Finalize,
                Call::ClearAll,
            ]
        );
    }
}
