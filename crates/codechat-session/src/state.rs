//! Connection lifecycle states.

/// How a closed connection may continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// A reconnect is scheduled or may be scheduled.
    Reconnectable,
    /// No automatic reconnect will happen; only `connect()` can resume.
    Terminal,
}

/// State of the transport session.
///
/// `Idle → Connecting → Open → Closed(Reconnectable) → Closed(Terminal)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been attempted yet.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The connection is established.
    Open,
    /// The connection is closed.
    Closed(Closure),
}

impl ConnectionState {
    /// Returns `true` when envelopes can be sent.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` when the session gave up reconnecting.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed(Closure::Terminal))
    }

    /// Human-readable display string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Open => "Connected",
            Self::Closed(Closure::Reconnectable) => "Reconnecting",
            Self::Closed(Closure::Terminal) => "Disconnected",
        }
    }
}
