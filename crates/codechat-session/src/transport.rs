//! The transport session.
//!
//! A [`TransportSession`] is a cheap handle to a driver task that exclusively
//! owns the connection, the connection state, the reconnect attempt counter
//! and the reconnect timer. The driver reacts to four sources multiplexed
//! with `tokio::select!`: caller commands, inbound frames, the in-flight
//! connection attempt, and the reconnect deadline. Nothing else mutates
//! connection state, so no lock guards it.
//!
//! Reconnects are scheduled only from the close path. A failed connection
//! attempt is reported as an `Error` event and then handled like an abnormal
//! closure, so it is scheduled exactly once.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use codechat_core::{ClientId, IncomingEnvelope, OutgoingEnvelope};

use crate::collaborators::CredentialProvider;
use crate::config::SessionConfig;
use crate::connector::{
    ConnectTarget, Connector, InboundFrame, Link, OutboundFrame, ABNORMAL_CLOSE_CODE,
};
use crate::error::{Result, SessionError};
use crate::events::{EventKind, Listeners, SessionEvent, SubscriptionId, TerminalReason};
use crate::reconnect::ReconnectPolicy;
use crate::state::{Closure, ConnectionState};

/// Requests from handles to the driver task.
enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        payload: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a streaming chat connection with automatic reconnects.
///
/// Cloning the handle shares the same connection. The driver task stops when
/// the last handle is dropped.
#[derive(Clone)]
pub struct TransportSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    listeners: Arc<Listeners>,
    client_id: ClientId,
    endpoint: Arc<str>,
}

impl TransportSession {
    /// Create a session with a freshly generated client identity.
    ///
    /// Must be called from within a tokio runtime. No connection is attempted
    /// until [`connect`](Self::connect) is called.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidEndpoint` if the server URL is unusable.
    pub fn new(
        config: &SessionConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        Self::with_client_id(ClientId::generate(), config, connector, credentials)
    }

    /// Create a session with an explicit client identity.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidEndpoint` if the server URL is unusable.
    pub fn with_client_id(
        client_id: ClientId,
        config: &SessionConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let endpoint = config.endpoint_for(&client_id)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let listeners = Arc::new(Listeners::new());

        let driver = Driver {
            endpoint: endpoint.clone(),
            connect_timeout: config.connect_timeout(),
            policy: config.reconnect_policy(),
            policy_close_code: config.policy_close_code,
            connector,
            credentials,
            listeners: Arc::clone(&listeners),
            state: state_tx,
            link: None,
            opening: None,
            waiters: Vec::new(),
            attempts: 0,
            reconnect_at: None,
        };
        tokio::spawn(driver.run(commands_rx));

        tracing::debug!(client_id = %client_id, endpoint = %endpoint, "Transport session created");

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            listeners,
            client_id,
            endpoint: endpoint.into(),
        })
    }

    /// Open the connection.
    ///
    /// Resolves immediately when already open. While an attempt is in flight
    /// the call waits for that attempt's outcome. A pending reconnect timer is
    /// cancelled and the attempt is made at once.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConnectFailed` if the attempt fails, or
    /// `SessionError::Closed` if the session is closed before it completes.
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Serialize and transmit one envelope.
    ///
    /// Nothing is buffered: if the connection is not open the envelope is
    /// dropped and no frame reaches the wire.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotConnected` unless the connection is open.
    pub async fn send(&self, envelope: &OutgoingEnvelope) -> Result<()> {
        let payload = envelope.to_json()?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { payload, reply })
            .map_err(|_| SessionError::NotConnected)?;
        rx.await.map_err(|_| SessionError::NotConnected)?
    }

    /// Close the connection for good and cancel any pending reconnect.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stable identity used in the endpoint path.
    #[must_use]
    pub const fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Full websocket URL of the chat endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Listener registry of this session.
    #[must_use]
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.listeners.subscribe(kind, handler)
    }

    /// Remove a handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Receive every event through a channel.
    #[must_use]
    pub fn event_stream(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.forward_all(&tx);
        rx
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Driver task
// =============================================================================

struct Driver {
    endpoint: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    policy_close_code: u16,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    listeners: Arc<Listeners>,
    state: watch::Sender<ConnectionState>,
    link: Option<Link>,
    opening: Option<BoxFuture<'static, Result<Link>>>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    attempts: u32,
    reconnect_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                frame = next_frame(&mut self.link) => self.handle_frame(frame),
                outcome = next_outcome(&mut self.opening) => {
                    self.opening = None;
                    self.finish_open(outcome);
                }
                () = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    tracing::debug!(attempt = self.attempts, "Reconnect timer fired");
                    self.start_open();
                }
            }
        }

        if let Some(link) = self.link.take() {
            let _ = link.send(OutboundFrame::Close);
        }
        tracing::debug!("Transport session driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.connect(reply),
            Command::Send { payload, reply } => {
                let _ = reply.send(self.send(payload));
            }
            Command::Close { reply } => {
                self.close();
                let _ = reply.send(());
            }
        }
    }

    fn connect(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.link.is_some() {
            let _ = reply.send(Ok(()));
            return;
        }

        self.waiters.push(reply);
        if self.opening.is_some() {
            return;
        }

        if self.reconnect_at.take().is_some() {
            tracing::debug!("Pending reconnect superseded by connect()");
        }
        self.start_open();
    }

    fn start_open(&mut self) {
        let target = ConnectTarget {
            url: self.endpoint.clone(),
            credential: self.credentials.credential(),
            timeout: self.connect_timeout,
        };
        let connector = Arc::clone(&self.connector);
        self.opening = Some(Box::pin(async move { connector.open(&target).await }));
        self.set_state(ConnectionState::Connecting);
    }

    fn finish_open(&mut self, outcome: Result<Link>) {
        match outcome {
            Ok(link) => {
                self.link = Some(link);
                self.attempts = 0;
                self.set_state(ConnectionState::Open);
                tracing::info!(endpoint = %self.endpoint, "Connected");
                self.emit(&SessionEvent::Open);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, attempt = self.attempts, "Connection attempt failed");
                self.emit(&SessionEvent::Error(err.clone()));
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(err.clone()));
                }
                self.on_close(ABNORMAL_CLOSE_CODE, String::new());
            }
        }
    }

    fn send(&self, payload: String) -> Result<()> {
        match &self.link {
            Some(link) => link.send(OutboundFrame::Text(payload)),
            None => Err(SessionError::NotConnected),
        }
    }

    fn handle_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::Text(text) => match IncomingEnvelope::from_json(&text) {
                Ok(IncomingEnvelope::Unknown) => {
                    tracing::debug!(text = %text, "Ignoring envelope with unknown type");
                }
                Ok(envelope) => self.emit(&SessionEvent::Message(envelope)),
                Err(e) => {
                    let err = SessionError::from(e);
                    tracing::warn!(error = %err, text = %text, "Dropping malformed frame");
                }
            },
            InboundFrame::Error(message) => {
                tracing::warn!(error = %message, "Connection error");
                self.emit(&SessionEvent::Error(SessionError::Transport(message)));
            }
            InboundFrame::Closed { code, reason } => {
                self.link = None;
                tracing::info!(code, reason = %reason, "Connection closed");
                self.on_close(code, reason);
            }
        }
    }

    fn on_close(&mut self, code: u16, reason: String) {
        if code == self.policy_close_code {
            tracing::warn!(code, reason = %reason, "Connection rejected, not reconnecting");
            self.set_state(ConnectionState::Closed(Closure::Terminal));
            self.emit(&SessionEvent::ClosedPermanently(TerminalReason::Rejected {
                code,
                reason,
            }));
            return;
        }

        self.set_state(ConnectionState::Closed(Closure::Reconnectable));
        match self.policy.next_attempt(self.attempts) {
            Some((attempt, delay)) => {
                self.attempts = attempt;
                self.reconnect_at = Some(Instant::now() + delay);
                tracing::info!(
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Scheduling reconnect"
                );
                self.emit(&SessionEvent::Reconnecting { attempt, delay });
            }
            None => {
                tracing::warn!(attempts = self.attempts, "Reconnect budget exhausted");
                self.set_state(ConnectionState::Closed(Closure::Terminal));
                self.emit(&SessionEvent::ClosedPermanently(
                    TerminalReason::RetriesExhausted {
                        attempts: self.attempts,
                    },
                ));
            }
        }
    }

    fn close(&mut self) {
        self.reconnect_at = None;
        if self.opening.take().is_some() {
            tracing::debug!("Abandoning in-flight connection attempt");
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Closed));
        }
        if let Some(link) = self.link.take() {
            let _ = link.send(OutboundFrame::Close);
        }

        if !self.state.borrow().is_terminal() {
            self.set_state(ConnectionState::Closed(Closure::Terminal));
            self.emit(&SessionEvent::ClosedPermanently(TerminalReason::ClientClosed));
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = previous.as_str(), to = next.as_str(), "Connection state changed");
        }
    }

    fn emit(&self, event: &SessionEvent) {
        self.listeners.emit(event);
    }
}

async fn next_frame(link: &mut Option<Link>) -> InboundFrame {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_outcome(opening: &mut Option<BoxFuture<'static, Result<Link>>>) -> Result<Link> {
    match opening {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
