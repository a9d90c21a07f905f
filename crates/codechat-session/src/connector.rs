//! Opening connections to the chat endpoint.
//!
//! A [`Connector`] turns a [`ConnectTarget`] into a [`Link`]: a pair of
//! channels carrying outbound frames to the socket and inbound frames from
//! it. [`WsConnector`] is the tokio-tungstenite implementation; it spawns one
//! writer and one reader task per connection.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Result, SessionError};

/// Close code reported when the peer closed without a status.
pub const NO_STATUS_CODE: u16 = 1005;

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Name of the cookie carrying the session credential.
pub const SESSION_COOKIE: &str = "session_token";

/// Where and how to connect.
#[derive(Clone)]
pub struct ConnectTarget {
    /// Full websocket URL including the client path.
    pub url: String,
    /// Session credential to present, if any.
    pub credential: Option<String>,
    /// Timeout for the opening handshake.
    pub timeout: Duration,
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("url", &self.url)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A frame sent toward the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A JSON text frame.
    Text(String),
    /// A normal close handshake.
    Close,
}

/// A frame received from the server side of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text frame.
    Text(String),
    /// The connection reported an error; a `Closed` frame follows.
    Error(String),
    /// The connection ended.
    Closed {
        /// Close code, or one of the synthetic codes in this module.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// An established connection as seen by the session driver.
#[derive(Debug)]
pub struct Link {
    outgoing: mpsc::UnboundedSender<OutboundFrame>,
    incoming: mpsc::UnboundedReceiver<InboundFrame>,
}

/// The far end of an in-memory [`Link`].
#[derive(Debug)]
pub struct RemoteEnd {
    /// Frames delivered to the client.
    pub to_client: mpsc::UnboundedSender<InboundFrame>,
    /// Frames the client sent.
    pub from_client: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl RemoteEnd {
    /// Deliver a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(InboundFrame::Text(text.into()));
    }

    /// Close the link from the server side with `code`.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.to_client.send(InboundFrame::Closed {
            code,
            reason: reason.into(),
        });
    }
}

impl Link {
    /// Wrap the two channel halves of a connection.
    #[must_use]
    pub const fn new(
        outgoing: mpsc::UnboundedSender<OutboundFrame>,
        incoming: mpsc::UnboundedReceiver<InboundFrame>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    /// Create a link whose far end is held in memory.
    #[must_use]
    pub fn in_memory() -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self::new(out_tx, in_rx),
            RemoteEnd {
                to_client: in_tx,
                from_client: out_rx,
            },
        )
    }

    /// Queue a frame for the socket.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotConnected` if the writer has gone away.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.outgoing
            .send(frame)
            .map_err(|_| SessionError::NotConnected)
    }

    /// Wait for the next inbound frame.
    ///
    /// A link whose reader went away without a close frame reports an
    /// abnormal closure.
    pub async fn recv(&mut self) -> InboundFrame {
        self.incoming
            .recv()
            .await
            .unwrap_or_else(|| InboundFrame::Closed {
                code: ABNORMAL_CLOSE_CODE,
                reason: String::new(),
            })
    }
}

/// Opens connections for a transport session.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one connection.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConnectFailed` if the connection could not be
    /// established.
    async fn open(&self, target: &ConnectTarget) -> Result<Link>;
}

// =============================================================================
// WebSocket implementation
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, target: &ConnectTarget) -> Result<Link> {
        let mut request = target
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        if let Some(token) = &target.credential {
            let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}"))
                .map_err(|e| SessionError::ConnectFailed(format!("invalid credential: {e}")))?;
            request.headers_mut().insert(COOKIE, cookie);
        }

        let (ws_stream, _) = tokio::time::timeout(target.timeout, connect_async(request))
            .await
            .map_err(|_| {
                SessionError::ConnectFailed(format!("timed out after {:?}", target.timeout))
            })?
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        tracing::debug!(url = %target.url, "WebSocket connected");

        let (write, read) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        tokio::spawn(ws_writer(write, outgoing_rx));
        tokio::spawn(ws_reader(read, incoming_tx));

        Ok(Link::new(outgoing_tx, incoming_rx))
    }
}

/// Task that writes outgoing frames until the link is dropped or closed.
async fn ws_writer(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            OutboundFrame::Close => {
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                let _ = write.send(Message::Close(Some(close))).await;
                break;
            }
        }
    }
    let _ = write.close().await;
}

/// Task that forwards inbound frames until the socket ends.
///
/// Always finishes with exactly one `Closed` frame.
async fn ws_reader(mut read: SplitStream<WsStream>, tx: mpsc::UnboundedSender<InboundFrame>) {
    while let Some(result) = read.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if tx.send(InboundFrame::Text(text)).is_err() {
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame.map_or((NO_STATUS_CODE, String::new()), |f| {
                    (u16::from(f.code), f.reason.into_owned())
                });
                tracing::debug!(code, reason = %reason, "WebSocket closed by server");
                let _ = tx.send(InboundFrame::Closed { code, reason });
                return;
            }
            // Ignore control frames and binary messages
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Binary(_)) => {}
            Err(e) => {
                let _ = tx.send(InboundFrame::Error(e.to_string()));
                break;
            }
        }
    }

    let _ = tx.send(InboundFrame::Closed {
        code: ABNORMAL_CLOSE_CODE,
        reason: String::new(),
    });
}

// =============================================================================
// Scripted implementation
// =============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{Script, ScriptedConnector};

#[cfg(any(test, feature = "test-utils"))]
mod scripted {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::{ConnectTarget, Connector, Link, RemoteEnd};
    use crate::error::{Result, SessionError};

    /// Outcome of one scripted connection attempt.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Script {
        /// Open an in-memory link.
        Accept,
        /// Fail with the given message.
        Refuse(String),
    }

    /// Connector that plays back a fixed list of outcomes.
    ///
    /// Attempts beyond the script are refused. Every accepted link's far end
    /// is published on the receiver returned by [`ScriptedConnector::new`].
    pub struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        attempts: Mutex<Vec<(Instant, ConnectTarget)>>,
        remotes: mpsc::UnboundedSender<RemoteEnd>,
    }

    impl ScriptedConnector {
        /// Create a connector and the receiver of accepted far ends.
        #[must_use]
        pub fn new(
            script: impl IntoIterator<Item = Script>,
        ) -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Self {
                script: Mutex::new(script.into_iter().collect()),
                attempts: Mutex::new(Vec::new()),
                remotes: tx,
            };
            (connector, rx)
        }

        /// Append outcomes to the script.
        pub fn extend(&self, more: impl IntoIterator<Item = Script>) {
            self.script.lock().extend(more);
        }

        /// Instants at which `open` was called.
        #[must_use]
        pub fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().iter().map(|(at, _)| *at).collect()
        }

        /// Targets passed to `open`, in order.
        #[must_use]
        pub fn targets(&self) -> Vec<ConnectTarget> {
            self.attempts
                .lock()
                .iter()
                .map(|(_, target)| target.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(&self, target: &ConnectTarget) -> Result<Link> {
            self.attempts.lock().push((Instant::now(), target.clone()));
            let next = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Script::Refuse("script exhausted".to_string()));

            match next {
                Script::Accept => {
                    let (link, remote) = Link::in_memory();
                    let _ = self.remotes.send(remote);
                    Ok(link)
                }
                Script::Refuse(reason) => Err(SessionError::ConnectFailed(reason)),
            }
        }
    }
}
