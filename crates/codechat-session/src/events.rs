//! Session events and the typed listener registry.
//!
//! Listeners subscribe to one [`EventKind`] and are called in registration
//! order every time an event of that kind is emitted. Handlers run on the
//! session's driver task; they may subscribe or unsubscribe while running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use codechat_core::IncomingEnvelope;

use crate::error::SessionError;

/// Why the session stopped reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// The server closed with the authorization-failure code.
    Rejected {
        /// Close code received.
        code: u16,
        /// Close reason received.
        reason: String,
    },
    /// Every reconnect attempt failed.
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// The caller closed the session.
    ClientClosed,
}

impl TerminalReason {
    /// The error a caller should surface for this reason.
    #[must_use]
    pub fn to_error(&self) -> SessionError {
        match self {
            Self::Rejected { code, reason } => SessionError::TransportRejected {
                code: *code,
                reason: reason.clone(),
            },
            Self::RetriesExhausted { attempts } => SessionError::TransportLost {
                attempts: *attempts,
            },
            Self::ClientClosed => SessionError::Closed,
        }
    }
}

/// Events emitted by a transport session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A connection was established.
    Open,
    /// A decoded envelope arrived.
    Message(IncomingEnvelope),
    /// A connection attempt or the live connection failed.
    Error(SessionError),
    /// A reconnect was scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The session will not reconnect on its own.
    ClosedPermanently(TerminalReason),
}

impl SessionEvent {
    /// The kind used to route this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::ClosedPermanently(_) => EventKind::ClosedPermanently,
        }
    }
}

/// Subscription key for [`Listeners`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`SessionEvent::Open`].
    Open,
    /// [`SessionEvent::Message`].
    Message,
    /// [`SessionEvent::Error`].
    Error,
    /// [`SessionEvent::Reconnecting`].
    Reconnecting,
    /// [`SessionEvent::ClosedPermanently`].
    ClosedPermanently,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Open,
        Self::Message,
        Self::Error,
        Self::Reconnecting,
        Self::ClosedPermanently,
    ];
}

/// Handle returned by [`Listeners::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registered callback. Returning `false` removes it after the current emit.
type Callback = Box<dyn FnMut(&SessionEvent) -> bool + Send>;

type Slot = Arc<Mutex<Callback>>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Slot)>>,
}

/// Ordered per-kind listener lists.
#[derive(Default)]
pub struct Listeners {
    inner: Mutex<Registry>,
}

impl Listeners {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, mut handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.insert(
            kind,
            Box::new(move |event| {
                handler(event);
                true
            }),
        )
    }

    fn insert(&self, kind: EventKind, callback: Callback) -> SubscriptionId {
        let mut registry = self.inner.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(Mutex::new(callback))));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.inner.lock();
        for handlers in registry.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(hid, _)| *hid == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    /// Forward every event of every kind into a channel.
    ///
    /// The forwarders unregister themselves once the receiver is dropped.
    pub fn forward_all(&self, tx: &mpsc::UnboundedSender<SessionEvent>) -> Vec<SubscriptionId> {
        EventKind::ALL
            .into_iter()
            .map(|kind| {
                let tx = tx.clone();
                self.insert(kind, Box::new(move |event| tx.send(event.clone()).is_ok()))
            })
            .collect()
    }

    /// Call every handler registered for the event's kind.
    ///
    /// The registry is not locked while handlers run, so a handler may
    /// subscribe or unsubscribe. Handlers added during an emit first see the
    /// next event.
    pub fn emit(&self, event: &SessionEvent) {
        let snapshot: Vec<(SubscriptionId, Slot)> = self
            .inner
            .lock()
            .handlers
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        let mut dead = Vec::new();
        for (id, slot) in snapshot {
            let mut callback = slot.lock();
            if !(*callback)(event) {
                dead.push(id);
            }
        }

        for id in dead {
            tracing::debug!(kind = ?event.kind(), "Removing listener with closed receiver");
            self.unsubscribe(id);
        }
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.inner.lock().handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.lock();
        let counts: HashMap<_, _> = registry
            .handlers
            .iter()
            .map(|(kind, handlers)| (*kind, handlers.len()))
            .collect();
        f.debug_struct("Listeners").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            listeners.subscribe(EventKind::Open, move |_| seen.lock().push(tag));
        }

        listeners.emit(&SessionEvent::Open);
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn events_only_reach_their_kind() {
        let listeners = Listeners::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&hits);
        listeners.subscribe(EventKind::Message, move |_| *counter.lock() += 1);

        listeners.emit(&SessionEvent::Open);
        listeners.emit(&SessionEvent::Message(IncomingEnvelope::Done));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let listeners = Listeners::new();
        let a = listeners.subscribe(EventKind::Error, |_| {});
        let _b = listeners.subscribe(EventKind::Error, |_| {});

        assert!(listeners.unsubscribe(a));
        assert!(!listeners.unsubscribe(a));
        assert_eq!(listeners.count(EventKind::Error), 1);
    }

    #[test]
    fn forward_all_bridges_into_channel() {
        let listeners = Listeners::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ids = listeners.forward_all(&tx);
        assert_eq!(ids.len(), EventKind::ALL.len());

        listeners.emit(&SessionEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1),
        });
        listeners.emit(&SessionEvent::ClosedPermanently(TerminalReason::ClientClosed));

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::Reconnecting { attempt: 1, .. }
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ClosedPermanently(TerminalReason::ClientClosed)
        );
    }

    #[test]
    fn dropped_receiver_removes_forwarders() {
        let listeners = Listeners::new();
        let (tx, rx) = mpsc::unbounded_channel();
        listeners.forward_all(&tx);
        drop(tx);
        drop(rx);

        listeners.emit(&SessionEvent::Open);
        assert_eq!(listeners.count(EventKind::Open), 0);
        assert_eq!(listeners.count(EventKind::Message), 1);

        listeners.emit(&SessionEvent::Message(IncomingEnvelope::Done));
        assert_eq!(listeners.count(EventKind::Message), 0);
    }

    #[test]
    fn handler_can_change_subscriptions_while_running() {
        let listeners = Arc::new(Listeners::new());
        let hits = Arc::new(Mutex::new(0));

        let registry = Arc::clone(&listeners);
        let counter = Arc::clone(&hits);
        let once = Arc::new(Mutex::new(None::<SubscriptionId>));
        let own_id = Arc::clone(&once);
        let id = listeners.subscribe(EventKind::Open, move |_| {
            let counter = Arc::clone(&counter);
            registry.subscribe(EventKind::Open, move |_| *counter.lock() += 1);
            if let Some(id) = own_id.lock().take() {
                registry.unsubscribe(id);
            }
        });
        *once.lock() = Some(id);

        listeners.emit(&SessionEvent::Open);
        assert_eq!(*hits.lock(), 0, "handlers added during an emit wait for the next one");
        assert_eq!(listeners.count(EventKind::Open), 1);

        listeners.emit(&SessionEvent::Open);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn terminal_reason_maps_to_error() {
        let rejected = TerminalReason::Rejected {
            code: 1008,
            reason: "invalid session".to_string(),
        };
        assert!(rejected.to_error().is_terminal());
        assert_eq!(
            TerminalReason::RetriesExhausted { attempts: 5 }.to_error(),
            SessionError::TransportLost { attempts: 5 }
        );
    }
}
