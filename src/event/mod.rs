//! Event system for out-of-band session notifications.
//!
//! Events carry what happens outside any caller's request/response flow:
//! connection lifecycle changes and value updates pushed by the peer.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::types::{PeerAddr, Uuid};

/// Event types emitted by a session.
#[derive(Debug, Clone)]
pub enum Event {
    /// The link to the peer came up.
    Connected {
        /// The peer the session manages.
        peer: PeerAddr,
    },
    /// The link to the peer went down.
    Disconnected {
        /// The peer the session manages.
        peer: PeerAddr,
    },
    /// A characteristic value update arrived.
    ///
    /// For targets registered with a fragment count above one this carries
    /// the reassembled value, surfaced once per full buffer.
    NotificationValue {
        /// The peer the session manages.
        peer: PeerAddr,
        /// Service the value belongs to.
        service: Uuid,
        /// Characteristic that changed.
        characteristic: Uuid,
        /// The (possibly reassembled) value.
        value: Bytes,
    },
}

/// A subscription to session events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` if the session is gone. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine; the event is simply dropped
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.inner.sender.subscribe();
        Subscription { receiver }
    }
}
