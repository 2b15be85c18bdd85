//! Per-peer session: serialized command execution over one transport channel.
//!
//! A [`Session`] is a cloneable handle to a background task that owns all
//! connection state. Every public operation becomes a message into that
//! task; completions come back over one-shot channels, so each call resolves
//! exactly once. Commands execute strictly in FIFO order with at most one
//! in flight against the transport at any time.

mod actor;
mod buffer;
mod queue;
mod resolve;

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::event::{EventDispatcher, Subscription};
use crate::transport::Transport;
use crate::types::{ConnectionState, PeerAddr, PriorityHint, Service, Uuid, WriteMode};

use actor::SessionActor;

/// Default maximum write chunk size (the minimum ATT payload).
pub const DEFAULT_MAX_CHUNK: usize = 20;

/// Capacity of the request mailbox and channel event queue.
const MAILBOX_CAPACITY: usize = 64;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// A deferred unit of work carrying its one-shot completion.
pub(crate) enum Command {
    RetrieveEntities {
        reply: Reply<Vec<Service>>,
    },
    Read {
        service: Uuid,
        characteristic: Uuid,
        reply: Reply<Bytes>,
    },
    Write {
        service: Uuid,
        characteristic: Uuid,
        payload: Bytes,
        max_chunk: usize,
        inter_chunk_delay: Duration,
        mode: WriteMode,
        reply: Reply<()>,
    },
    ReadDescriptor {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        reply: Reply<Bytes>,
    },
    WriteDescriptor {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Bytes,
        reply: Reply<()>,
    },
    SetNotify {
        service: Uuid,
        characteristic: Uuid,
        fragment_count: usize,
        enable: bool,
        reply: Reply<()>,
    },
    ReadSignalStrength {
        reply: Reply<i16>,
    },
    RequestMtu {
        size: u16,
        reply: Reply<u16>,
    },
    RequestPriority {
        hint: PriorityHint,
        reply: Reply<()>,
    },
    RefreshCache {
        reply: Reply<()>,
    },
}

impl Command {
    /// Resolves the command's completion with an error.
    pub(crate) fn fail(self, err: Error) {
        match self {
            Self::RetrieveEntities { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::Read { reply, .. } | Self::ReadDescriptor { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Write { reply, .. }
            | Self::WriteDescriptor { reply, .. }
            | Self::SetNotify { reply, .. }
            | Self::RequestPriority { reply, .. }
            | Self::RefreshCache { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::ReadSignalStrength { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::RequestMtu { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Messages accepted by the session task.
pub(crate) enum Request {
    Connect { reply: Reply<()> },
    Disconnect { force: bool, reply: Reply<()> },
    Enqueue(Command),
    State { reply: oneshot::Sender<ConnectionState> },
    Services { reply: oneshot::Sender<Vec<Service>> },
    Rssi { reply: oneshot::Sender<Option<i16>> },
    Mtu { reply: oneshot::Sender<Option<u16>> },
}

/// Handle to one session managing a single remote peer.
///
/// Cheap to clone; all clones talk to the same background task.
#[derive(Clone)]
pub struct Session {
    peer: PeerAddr,
    requests: mpsc::Sender<Request>,
    dispatcher: EventDispatcher,
}

impl Session {
    /// Spawns the session task for a peer on the given transport.
    ///
    /// The session starts disconnected; call [`Session::connect`] to bring
    /// the link up.
    #[must_use]
    pub fn spawn<T: Transport + 'static>(peer: PeerAddr, transport: T) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let dispatcher = EventDispatcher::new(EVENT_CAPACITY);

        let actor = SessionActor::new(peer, transport, dispatcher.clone(), requests_rx);
        tokio::spawn(actor.run());

        Self {
            peer,
            requests: requests_tx,
            dispatcher,
        }
    }

    /// Returns the peer this session manages.
    #[must_use]
    pub const fn peer(&self) -> PeerAddr {
        self.peer
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    async fn request<T>(
        &self,
        request: Request,
        reply: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.requests
            .send(request)
            .await
            .map_err(|_| Error::Closed)?;
        reply.await.map_err(|_| Error::Closed)?
    }

    async fn query<T>(&self, request: Request, reply: oneshot::Receiver<T>) -> Result<T> {
        self.requests
            .send(request)
            .await
            .map_err(|_| Error::Closed)?;
        reply.await.map_err(|_| Error::Closed)
    }

    async fn enqueue<T>(&self, command: Command, reply: oneshot::Receiver<Result<T>>) -> Result<T> {
        self.request(Request::Enqueue(command), reply).await
    }

    /// Connects to the peer.
    ///
    /// Resolves once the transport confirms the link. Connecting also
    /// triggers automatic entity discovery as a side effect.
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Connect { reply }, rx).await
    }

    /// Disconnects from the peer.
    ///
    /// All queued commands and pending operations fail with
    /// [`Error::Disconnected`]. With `force` the channel handle is released
    /// immediately; otherwise release waits for the transport to report the
    /// link loss.
    pub async fn disconnect(&self, force: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Disconnect { force, reply }, rx).await
    }

    /// Retrieves the peer's service tree, running a fresh discovery.
    pub async fn retrieve_entities(&self) -> Result<Vec<Service>> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::RetrieveEntities { reply }, rx).await
    }

    /// Reads a characteristic value.
    pub async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Bytes> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            Command::Read {
                service,
                characteristic,
                reply,
            },
            rx,
        )
        .await
    }

    /// Writes a characteristic value.
    ///
    /// Payloads larger than `max_chunk` are fragmented. In
    /// [`WriteMode::WithResponse`] the next chunk goes out only after the
    /// previous one is acknowledged and the call resolves after the final
    /// acknowledgement. In [`WriteMode::WithoutResponse`] all chunks are
    /// submitted back to back with `inter_chunk_delay` between them and the
    /// call resolves once the last chunk is accepted.
    pub async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: Bytes,
        max_chunk: usize,
        inter_chunk_delay: Duration,
        mode: WriteMode,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            Command::Write {
                service,
                characteristic,
                payload,
                max_chunk,
                inter_chunk_delay,
                mode,
                reply,
            },
            rx,
        )
        .await
    }

    /// Reads a descriptor value.
    pub async fn read_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Bytes> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            Command::ReadDescriptor {
                service,
                characteristic,
                descriptor,
                reply,
            },
            rx,
        )
        .await
    }

    /// Writes a descriptor value.
    pub async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Bytes,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            Command::WriteDescriptor {
                service,
                characteristic,
                descriptor,
                payload,
                reply,
            },
            rx,
        )
        .await
    }

    /// Enables notifications for a characteristic.
    ///
    /// With `fragment_count` above one, raw notifications are buffered and
    /// surfaced as one reassembled
    /// [`Event::NotificationValue`](crate::event::Event::NotificationValue)
    /// per `fragment_count` fragments.
    pub async fn register_notify(
        &self,
        service: Uuid,
        characteristic: Uuid,
        fragment_count: usize,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            Command::SetNotify {
                service,
                characteristic,
                fragment_count,
                enable: true,
                reply,
            },
            rx,
        )
        .await
    }

    /// Disables notifications for a characteristic and drops its buffer.
    pub async fn remove_notify(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            Command::SetNotify {
                service,
                characteristic,
                fragment_count: 0,
                enable: false,
                reply,
            },
            rx,
        )
        .await
    }

    /// Reads the current signal strength in dBm.
    pub async fn read_signal_strength(&self) -> Result<i16> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::ReadSignalStrength { reply }, rx).await
    }

    /// Negotiates the maximum payload size, returning the agreed value.
    pub async fn request_max_payload_size(&self, size: u16) -> Result<u16> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::RequestMtu { size, reply }, rx).await
    }

    /// Passes a connection priority hint to the transport.
    pub async fn request_priority_hint(&self, hint: PriorityHint) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::RequestPriority { hint, reply }, rx)
            .await
    }

    /// Asks the transport to drop its cached entity data for the peer.
    pub async fn refresh_cache(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::RefreshCache { reply }, rx).await
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> Result<ConnectionState> {
        let (reply, rx) = oneshot::channel();
        self.query(Request::State { reply }, rx).await
    }

    /// Returns the cached service tree from the last discovery.
    pub async fn services(&self) -> Result<Vec<Service>> {
        let (reply, rx) = oneshot::channel();
        self.query(Request::Services { reply }, rx).await
    }

    /// Returns the last signal strength reading, if any.
    pub async fn rssi(&self) -> Result<Option<i16>> {
        let (reply, rx) = oneshot::channel();
        self.query(Request::Rssi { reply }, rx).await
    }

    /// Returns the negotiated maximum payload size, if any.
    pub async fn mtu(&self) -> Result<Option<u16>> {
        let (reply, rx) = oneshot::channel();
        self.query(Request::Mtu { reply }, rx).await
    }
}
