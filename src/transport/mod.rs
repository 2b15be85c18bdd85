//! Transport layer interface.
//!
//! The session core does not talk to any radio itself. The embedder supplies
//! a [`Transport`] that can open a [`Channel`] to a peer; the channel accepts
//! at most one outstanding operation at a time and reports completions
//! asynchronously as [`ChannelEvent`]s on the sender handed to
//! [`Transport::open_channel`].
//!
//! Submission primitives return synchronously: `Ok(())` means the operation
//! was accepted and exactly one completion event will follow (except for the
//! synchronously-completing [`Channel::request_priority`] and
//! [`Channel::refresh_cache`]); `Err(SubmitError)` means the transport
//! rejected the call and no event will ever arrive for it.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{PeerAddr, PriorityHint, Service, Status, Uuid, WriteMode};

/// The transport rejected a submission synchronously.
#[derive(Debug, Clone, Copy, Error)]
#[error("submission rejected by transport")]
pub struct SubmitError;

/// Completion callbacks delivered by the transport.
///
/// Events may be produced on any task; the session marshals them into its
/// own execution context before touching shared state.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The link state changed.
    ConnectionChanged {
        /// True when the link came up, false when it went down.
        connected: bool,
        /// Transport status for the transition.
        status: Status,
    },
    /// Entity discovery finished.
    EntitiesDiscovered {
        /// Discovery status.
        status: Status,
        /// The discovered service tree (empty unless successful).
        services: Vec<Service>,
    },
    /// A characteristic read finished.
    CharacteristicRead {
        /// Read status.
        status: Status,
        /// The value (empty unless successful).
        value: Bytes,
    },
    /// A characteristic write was acknowledged.
    CharacteristicWritten {
        /// Write status.
        status: Status,
    },
    /// A descriptor read finished.
    DescriptorRead {
        /// Read status.
        status: Status,
        /// The value (empty unless successful).
        value: Bytes,
    },
    /// A descriptor write was acknowledged.
    DescriptorWritten {
        /// Write status.
        status: Status,
    },
    /// A notification enable/disable request finished.
    NotifyConfigured {
        /// Configuration status.
        status: Status,
    },
    /// The peer pushed a characteristic value update.
    Notification {
        /// Service the value belongs to.
        service: Uuid,
        /// Characteristic that changed.
        characteristic: Uuid,
        /// The raw (possibly fragmented) value.
        value: Bytes,
    },
    /// A signal strength read finished.
    SignalStrength {
        /// Read status.
        status: Status,
        /// Signal strength in dBm.
        rssi: i16,
    },
    /// A maximum payload size negotiation finished.
    MtuChanged {
        /// Negotiation status.
        status: Status,
        /// The negotiated payload size.
        mtu: u16,
    },
}

/// A live conduit to a remote peer, exclusively owned by one session.
pub trait Channel: Send {
    /// Starts service/characteristic discovery.
    fn discover_entities(&mut self) -> Result<(), SubmitError>;

    /// Starts a characteristic value read.
    fn read_characteristic(&mut self, service: Uuid, instance: u16) -> Result<(), SubmitError>;

    /// Submits a characteristic value write.
    ///
    /// In [`WriteMode::WithoutResponse`] no completion event follows an
    /// accepted submission.
    fn write_characteristic(
        &mut self,
        service: Uuid,
        instance: u16,
        value: Bytes,
        mode: WriteMode,
    ) -> Result<(), SubmitError>;

    /// Starts a descriptor value read.
    fn read_descriptor(
        &mut self,
        service: Uuid,
        instance: u16,
        descriptor: Uuid,
    ) -> Result<(), SubmitError>;

    /// Submits a descriptor value write.
    fn write_descriptor(
        &mut self,
        service: Uuid,
        instance: u16,
        descriptor: Uuid,
        value: Bytes,
    ) -> Result<(), SubmitError>;

    /// Enables or disables value notifications for a characteristic.
    ///
    /// `indication` selects acknowledged indications instead of plain
    /// notifications when enabling.
    fn set_notify(
        &mut self,
        service: Uuid,
        instance: u16,
        enable: bool,
        indication: bool,
    ) -> Result<(), SubmitError>;

    /// Starts a signal strength read.
    fn read_signal_strength(&mut self) -> Result<(), SubmitError>;

    /// Requests negotiation of the maximum payload size.
    fn request_mtu(&mut self, size: u16) -> Result<(), SubmitError>;

    /// Passes a connection priority hint to the transport.
    ///
    /// Completes synchronously; no event follows.
    fn request_priority(&mut self, hint: PriorityHint) -> Result<(), SubmitError>;

    /// Asks the transport to drop its cached entity data for the peer.
    ///
    /// Completes synchronously; no event follows.
    fn refresh_cache(&mut self) -> Result<(), SubmitError>;

    /// Requests a graceful close of the link.
    ///
    /// The transport reports the actual link loss via
    /// [`ChannelEvent::ConnectionChanged`].
    fn close(&mut self);
}

/// Factory for channels to remote peers.
pub trait Transport: Send {
    /// Acquires a channel to the peer.
    ///
    /// Completion events for the channel must be sent to `events`. Returns
    /// an error if no channel can be acquired, in which case the connect
    /// attempt fails immediately.
    fn open_channel(
        &mut self,
        peer: PeerAddr,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<Box<dyn Channel>, SubmitError>;
}
