//! Application state.
//!
//! The [`App`] owns the chat controller (and through it the transcript and
//! the transport session), the REST client, and everything the input line
//! and status bar need.

use std::path::PathBuf;

use codechat_api::{ApiClient, HistoryQuery};
use codechat_core::CommandSpec;
use codechat_session::{
    ChatController, ChatError, ConnectionState, CredentialProvider, SessionEvent, TerminalReason,
    TransportSession,
};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::commands::{self, LocalCommand};
use crate::settings::LocalSettings;
use crate::transcript::Transcript;

/// Lines moved per PgUp/PgDn.
const PAGE: usize = 10;

/// Presents the REST login cookie to the chat connection.
#[derive(Debug, Clone)]
pub struct ApiCredential(pub ApiClient);

impl CredentialProvider for ApiCredential {
    fn credential(&self) -> Option<String> {
        self.0.session_token()
    }
}

/// Application state.
pub struct App {
    controller: ChatController<Transcript, LocalSettings>,
    api: ApiClient,
    settings_path: PathBuf,
    /// Current input buffer.
    pub input: String,
    /// Cursor position in characters.
    pub cursor: usize,
    /// Lines scrolled up from the bottom of the transcript.
    pub scroll: usize,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
    pub show_help: bool,
    pub should_quit: bool,
    pub animation_frame: usize,
}

impl App {
    /// Create the app around an existing transport session.
    #[must_use]
    pub fn new(
        api: ApiClient,
        transport: TransportSession,
        settings: LocalSettings,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            controller: ChatController::new(transport, Transcript::default(), settings),
            api,
            settings_path,
            input: String::new(),
            cursor: 0,
            scroll: 0,
            status_message: None,
            error_message: None,
            show_help: false,
            should_quit: false,
            animation_frame: 0,
        }
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        self.controller.presentation()
    }

    #[must_use]
    pub fn settings(&self) -> &LocalSettings {
        self.controller.settings()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.controller.transport().state()
    }

    #[must_use]
    pub fn server_url(&self) -> &str {
        self.api.base_url()
    }

    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.controller.is_generating()
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.error_message = None;
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub fn tick_animation(&mut self) {
        self.animation_frame = self.animation_frame.wrapping_add(1);
    }

    #[must_use]
    pub fn spinner_char(&self) -> &'static str {
        const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        SPINNER[self.animation_frame % SPINNER.len()]
    }

    /// Palette entries for the current input.
    #[must_use]
    pub fn suggestions(&self) -> Vec<&'static CommandSpec> {
        commands::suggestions(&self.input)
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Start connecting in the background. Progress arrives as session events.
    pub fn connect(&mut self) {
        self.set_status("Connecting...");
        let transport = self.controller.transport().clone();
        tokio::spawn(async move {
            if let Err(e) = transport.connect().await {
                tracing::debug!(error = %e, "Connect attempt failed");
            }
        });
    }

    /// Replay stored history into the transcript.
    pub async fn load_history(&mut self) {
        if !self.api.is_authenticated() {
            return;
        }
        match self.api.history(&HistoryQuery::default()).await {
            Ok(page) => {
                for message in &page.messages {
                    self.controller
                        .render_history([(message.role, message.content.as_str())]);
                    self.controller
                        .presentation_mut()
                        .stamp_last(message.timestamp);
                }
                tracing::info!(loaded = page.messages.len(), total = page.total, "Loaded history");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load history");
                self.set_error(format!("Failed to load history: {e}"));
            }
        }
    }

    /// React to one transport event.
    pub fn handle_session_event(&mut self, event: &SessionEvent) {
        self.controller.handle_event(event);
        match event {
            SessionEvent::Open => self.set_status("Connected"),
            SessionEvent::Reconnecting { attempt, delay } => self.set_status(format!(
                "Connection lost, retrying in {}s (attempt {attempt})",
                delay.as_secs()
            )),
            SessionEvent::ClosedPermanently(TerminalReason::ClientClosed) => {
                self.set_status("Disconnected");
            }
            SessionEvent::ClosedPermanently(_) => {
                self.set_status("Disconnected. Type /reconnect to try again");
            }
            SessionEvent::Message(_) | SessionEvent::Error(_) => {}
        }
        if self.is_generating() {
            self.scroll = 0;
        }
    }

    /// Close the connection before exiting.
    pub async fn shutdown(&mut self) {
        self.controller.transport().close().await;
    }

    // =========================================================================
    // Keys
    // =========================================================================

    /// Handle one key press.
    pub async fn handle_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Char('a') if ctrl => self.cursor = 0,
            KeyCode::Char('e') if ctrl => self.cursor = self.input.chars().count(),
            KeyCode::Char('u') if ctrl => self.clear_input(),
            KeyCode::Char('w') if ctrl => self.delete_word(),
            KeyCode::Esc => self.escape().await,
            KeyCode::Enter => self.submit().await,
            KeyCode::Tab => self.complete(),
            KeyCode::PageUp => self.scroll = self.scroll.saturating_add(PAGE),
            KeyCode::PageDown => self.scroll = self.scroll.saturating_sub(PAGE),
            KeyCode::Char(c) => self.insert_char(c),
            KeyCode::Backspace => self.delete_char(),
            KeyCode::Delete => self.delete_char_forward(),
            KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Right => self.cursor = (self.cursor + 1).min(self.input.chars().count()),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.input.chars().count(),
            _ => {}
        }
    }

    async fn escape(&mut self) {
        if self.show_help {
            self.show_help = false;
        } else if self.is_generating() {
            self.controller.abort().await;
            self.set_status("Stopped");
        } else if self.error_message.is_some() {
            self.error_message = None;
        } else {
            self.clear_input();
        }
    }

    /// Replace a partial `/command` with the first palette match.
    fn complete(&mut self) {
        if let Some(first) = self.suggestions().first() {
            self.input = format!("{} ", first.name);
            self.cursor = self.input.chars().count();
        }
    }

    /// Send the input, or run it if it is a local command.
    pub async fn submit(&mut self) {
        let raw = self.take_input();
        if raw.trim().is_empty() {
            return;
        }

        match LocalCommand::parse(&raw) {
            Some(Ok(command)) => self.run_local(command).await,
            Some(Err(usage)) => {
                self.set_error(usage);
                self.restore_input(raw);
            }
            None => match self.controller.send_input(&raw).await {
                Ok(()) => {
                    self.scroll = 0;
                    self.error_message = None;
                }
                Err(ChatError::TurnInProgress) => {
                    self.set_error("Still responding. Press Esc to stop it first");
                    self.restore_input(raw);
                }
                // Shown in the transcript already.
                Err(ChatError::Session(_) | ChatError::EmptyInput) => {}
            },
        }
    }

    async fn run_local(&mut self, command: LocalCommand) {
        tracing::debug!(command = ?command, "Local command");
        match command {
            LocalCommand::Clear => match self.api.clear_history().await {
                Ok(()) => {
                    self.controller.clear_transcript();
                    self.set_status("History cleared");
                }
                Err(e) => self.set_error(format!("Failed to clear history: {e}")),
            },
            LocalCommand::Search(query) => {
                let shown = self.controller.presentation_mut().set_filter(&query);
                self.scroll = 0;
                if query.is_empty() {
                    self.set_status("Search cleared");
                } else {
                    self.set_status(format!("{shown} matching messages"));
                }
            }
            LocalCommand::Set { key, value } => self.update_setting(&key, &value).await,
            LocalCommand::Reconnect => self.reconnect().await,
            LocalCommand::Logout => self.logout().await,
            LocalCommand::Help => self.show_help = true,
            LocalCommand::Quit => self.should_quit = true,
        }
    }

    /// Reconnect once the server answers its health check.
    async fn reconnect(&mut self) {
        match self.api.health().await {
            Ok(health) if health.is_healthy() => self.connect(),
            Ok(health) => {
                self.set_error(format!("Server is not ready (status: {})", health.status));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed");
                self.set_error(format!("Server unreachable: {e}"));
            }
        }
    }

    /// End the server session and drop the chat connection.
    async fn logout(&mut self) {
        let result = self.api.logout().await;
        self.controller.transport().close().await;
        match result {
            Ok(()) => self.set_status("Logged out"),
            Err(e) => {
                tracing::warn!(error = %e, "Logout failed");
                self.set_error(format!("Logout failed: {e}"));
            }
        }
    }

    async fn update_setting(&mut self, key: &str, value: &str) {
        let update = match self.controller.settings_mut().apply(key, value) {
            Ok(update) => update,
            Err(e) => {
                self.set_error(e.to_string());
                return;
            }
        };

        if let Err(e) = self.controller.settings().save(&self.settings_path) {
            tracing::warn!(error = %e, "Failed to save settings");
            self.set_error(e.to_string());
            return;
        }

        if self.api.is_authenticated() {
            if let Err(e) = self.api.update_settings(&update).await {
                self.set_error(format!("Saved locally, server update failed: {e}"));
                return;
            }
        }
        self.set_status(format!("{key} set to {value}"));
    }

    // =========================================================================
    // Input Editing
    // =========================================================================

    fn byte_index(&self, chars: usize) -> usize {
        self.input
            .char_indices()
            .nth(chars)
            .map_or(self.input.len(), |(i, _)| i)
    }

    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_index(self.cursor);
        self.input.insert(at, c);
        self.cursor += 1;
    }

    pub fn delete_char(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let at = self.byte_index(self.cursor);
            self.input.remove(at);
        }
    }

    pub fn delete_char_forward(&mut self) {
        if self.cursor < self.input.chars().count() {
            let at = self.byte_index(self.cursor);
            self.input.remove(at);
        }
    }

    fn delete_word(&mut self) {
        while self.cursor > 0 {
            self.delete_char();
            let prev = self.cursor.checked_sub(1).and_then(|i| self.input.chars().nth(i));
            if prev == Some(' ') {
                break;
            }
        }
    }

    pub fn clear_input(&mut self) {
        self.input.clear();
        self.cursor = 0;
    }

    fn take_input(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.input)
    }

    fn restore_input(&mut self, raw: String) {
        self.cursor = raw.chars().count();
        self.input = raw;
    }
}
