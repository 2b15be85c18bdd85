//! The session task.
//!
//! All mutable session state lives here and is touched only by this task:
//! transport callbacks and caller requests are both messages into the same
//! mailbox, so command logic needs no locking. The queue's busy flag plus
//! the per-category expectation slots enforce the transport's single
//! in-flight operation constraint.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{EntityKind, Error};
use crate::event::{Event, EventDispatcher};
use crate::transport::{Channel, ChannelEvent, Transport};
use crate::types::{ConnectionState, PeerAddr, Service, Status, Uuid, WriteMode};

use super::buffer::NotifyBuffer;
use super::queue::CommandQueue;
use super::resolve;
use super::{Command, Reply, Request, MAILBOX_CAPACITY};

/// Category of the command currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Discover,
    Read,
    Write,
    DescriptorRead,
    DescriptorWrite,
    Notify,
    Rssi,
    Mtu,
}

/// Outcome of dispatching a command against the transport.
enum Dispatch {
    /// An asynchronous completion is outstanding; the queue stays busy.
    Pending(OpKind),
    /// The command finished during dispatch; the queue may advance.
    Done,
}

/// One pending completion holder per operation category.
///
/// The one-shot senders make "exactly one outstanding expectation" a
/// type-level guarantee: a completion can fire at most once.
#[derive(Default)]
struct Expectations {
    discover: Option<Reply<Vec<Service>>>,
    read: Option<Reply<Bytes>>,
    write: Option<Reply<()>>,
    descriptor_read: Option<Reply<Bytes>>,
    descriptor_write: Option<Reply<()>>,
    notify: Option<Reply<()>>,
    rssi: Option<Reply<i16>>,
    mtu: Option<Reply<u16>>,
}

impl Expectations {
    /// Fails every populated slot with a "device disconnected" error.
    fn fail_all(&mut self) {
        if let Some(reply) = self.discover.take() {
            let _ = reply.send(Err(Error::Disconnected));
        }
        if let Some(reply) = self.read.take() {
            let _ = reply.send(Err(Error::Disconnected));
        }
        if let Some(reply) = self.write.take() {
            let _ = reply.send(Err(Error::Disconnected));
        }
        if let Some(reply) = self.descriptor_read.take() {
            let _ = reply.send(Err(Error::Disconnected));
        }
        if let Some(reply) = self.descriptor_write.take() {
            let _ = reply.send(Err(Error::Disconnected));
        }
        if let Some(reply) = self.notify.take() {
            let _ = reply.send(Err(Error::Disconnected));
        }
        if let Some(reply) = self.rssi.take() {
            let _ = reply.send(Err(Error::Disconnected));
        }
        if let Some(reply) = self.mtu.take() {
            let _ = reply.send(Err(Error::Disconnected));
        }
    }
}

pub(crate) struct SessionActor<T> {
    peer: PeerAddr,
    transport: T,
    dispatcher: EventDispatcher,
    requests: mpsc::Receiver<Request>,

    state: ConnectionState,
    channel: Option<Box<dyn Channel>>,
    channel_events: Option<mpsc::Receiver<ChannelEvent>>,

    queue: CommandQueue,
    current: Option<OpKind>,
    pending: Expectations,
    connect_reply: Option<Reply<()>>,
    discover_in_flight: bool,

    services: Vec<Service>,
    write_chunks: VecDeque<Bytes>,
    chunk_target: Option<(Uuid, u16)>,
    buffers: HashMap<(Uuid, Uuid), NotifyBuffer>,
    rssi: Option<i16>,
    mtu: Option<u16>,
}

impl<T: Transport> SessionActor<T> {
    pub(crate) fn new(
        peer: PeerAddr,
        transport: T,
        dispatcher: EventDispatcher,
        requests: mpsc::Receiver<Request>,
    ) -> Self {
        Self {
            peer,
            transport,
            dispatcher,
            requests,
            state: ConnectionState::Disconnected,
            channel: None,
            channel_events: None,
            queue: CommandQueue::new(),
            current: None,
            pending: Expectations::default(),
            connect_reply: None,
            discover_in_flight: false,
            services: Vec::new(),
            write_chunks: VecDeque::new(),
            chunk_target: None,
            buffers: HashMap::new(),
            rssi: None,
            mtu: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let has_events = self.channel_events.is_some();
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                event = recv_event(&mut self.channel_events), if has_events => match event {
                    Some(event) => self.handle_channel_event(event).await,
                    None => {
                        tracing::debug!("transport dropped its event sender: {}", self.peer);
                        self.link_lost();
                    }
                },
            }
        }

        // Every handle is gone; tear down whatever is left
        if self.channel.is_some() {
            self.link_lost();
        } else {
            self.fail_pending_work();
        }
        tracing::debug!("session task for {} finished", self.peer);
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { reply } => self.handle_connect(reply),
            Request::Disconnect { force, reply } => self.handle_disconnect(force, reply),
            Request::Enqueue(command) => {
                self.queue.push(command);
                self.advance().await;
            }
            Request::State { reply } => {
                let _ = reply.send(self.state);
            }
            Request::Services { reply } => {
                let _ = reply.send(self.services.clone());
            }
            Request::Rssi { reply } => {
                let _ = reply.send(self.rssi);
            }
            Request::Mtu { reply } => {
                let _ = reply.send(self.mtu);
            }
        }
    }

    // ==================== Connection state machine ====================

    fn handle_connect(&mut self, reply: Reply<()>) {
        match self.state {
            ConnectionState::Connected => {
                // Already up; succeed if the channel is intact
                let result = if self.channel.is_some() {
                    Ok(())
                } else {
                    Err(Error::NotConnected)
                };
                let _ = reply.send(result);
            }
            ConnectionState::Connecting => {
                let _ = reply.send(Err(Error::ConnectInProgress));
            }
            ConnectionState::Disconnected => {
                // A gracefully-closing channel may still be held; a new
                // connect supersedes it
                if self.channel.take().is_some() {
                    self.channel_events = None;
                }

                let (events_tx, events_rx) = mpsc::channel(MAILBOX_CAPACITY);
                match self.transport.open_channel(self.peer, events_tx) {
                    Ok(channel) => {
                        tracing::debug!("connecting to {}", self.peer);
                        self.channel = Some(channel);
                        self.channel_events = Some(events_rx);
                        self.state = ConnectionState::Connecting;
                        self.connect_reply = Some(reply);
                    }
                    Err(_) => {
                        tracing::warn!("could not acquire channel to {}", self.peer);
                        let _ = reply.send(Err(Error::ConnectionFailed));
                    }
                }
            }
        }
    }

    fn handle_disconnect(&mut self, force: bool, reply: Reply<()>) {
        self.fail_pending_work();
        self.state = ConnectionState::Disconnected;

        if let Some(channel) = self.channel.as_mut() {
            channel.close();
            if force {
                self.channel = None;
                self.channel_events = None;
                tracing::debug!("disconnected from {} (forced)", self.peer);
                self.dispatcher.dispatch(Event::Disconnected { peer: self.peer });
            }
            // Without force, the handle is released when the transport
            // reports the link loss
        } else {
            tracing::debug!("disconnect with no channel: {}", self.peer);
        }

        let _ = reply.send(Ok(()));
    }

    fn on_connection_changed(&mut self, connected: bool, status: Status) {
        if connected && status.is_success() {
            tracing::debug!("connected to {}", self.peer);
            self.state = ConnectionState::Connected;

            // Automatic entity discovery is a side effect of connecting,
            // not caller-initiated
            if let Some(channel) = self.channel.as_mut() {
                match channel.discover_entities() {
                    Ok(()) => self.discover_in_flight = true,
                    Err(_) => tracing::warn!("automatic entity discovery rejected"),
                }
            }

            self.dispatcher.dispatch(Event::Connected { peer: self.peer });
            if let Some(reply) = self.connect_reply.take() {
                let _ = reply.send(Ok(()));
            }
        } else {
            tracing::debug!(
                "link to {} lost (connected={}, status={})",
                self.peer,
                connected,
                status
            );
            self.link_lost();
        }
    }

    /// Fails all queued and pending work, leaving the queue idle.
    ///
    /// Commands still queued are failed individually rather than silently
    /// dropped, so every caller observes exactly one outcome.
    fn fail_pending_work(&mut self) {
        let queued = self.queue.drain();
        if !queued.is_empty() {
            tracing::debug!("failing {} queued commands", queued.len());
        }
        for command in queued {
            command.fail(Error::Disconnected);
        }

        self.current = None;
        self.pending.fail_all();
        if let Some(reply) = self.connect_reply.take() {
            let _ = reply.send(Err(Error::ConnectionFailed));
        }

        self.write_chunks.clear();
        self.chunk_target = None;
        self.discover_in_flight = false;
        for buffer in self.buffers.values_mut() {
            buffer.reset();
        }
    }

    /// Unconditional teardown after a lost or failed link.
    ///
    /// Safe to run twice; a second invocation finds nothing to release.
    fn link_lost(&mut self) {
        self.fail_pending_work();

        let had_channel = self.channel.is_some();
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.channel_events = None;

        let was_up = self.state != ConnectionState::Disconnected;
        self.state = ConnectionState::Disconnected;

        if had_channel || was_up {
            self.dispatcher.dispatch(Event::Disconnected { peer: self.peer });
        }
    }

    // ==================== Command queue ====================

    /// Starts the next queued command if the queue is idle.
    async fn advance(&mut self) {
        loop {
            if self.queue.is_busy() || self.queue.is_empty() {
                return;
            }
            if self.channel.is_none() {
                tracing::debug!("no channel, failing queued commands");
                for command in self.queue.drain() {
                    command.fail(Error::NotConnected);
                }
                return;
            }

            let Some(command) = self.queue.start() else {
                return;
            };
            match self.dispatch(command).await {
                Dispatch::Pending(kind) => {
                    self.current = Some(kind);
                    return;
                }
                Dispatch::Done => self.queue.complete(),
            }
        }
    }

    /// Finishes the executing command and starts the next one.
    async fn complete_current(&mut self) {
        self.current = None;
        self.queue.complete();
        self.advance().await;
    }

    /// Completes the queue only if the executing command matches `kind`.
    ///
    /// Completions for operations this session did not start (for example
    /// the automatic discovery after connecting) must not pop an unrelated
    /// command.
    async fn complete_if_current(&mut self, kind: OpKind) {
        if self.current == Some(kind) {
            self.complete_current().await;
        }
    }

    // ==================== Operation dispatch ====================

    async fn dispatch(&mut self, command: Command) -> Dispatch {
        match command {
            Command::RetrieveEntities { reply } => self.dispatch_retrieve(reply),
            Command::Read {
                service,
                characteristic,
                reply,
            } => self.dispatch_read(service, characteristic, reply),
            Command::Write {
                service,
                characteristic,
                payload,
                max_chunk,
                inter_chunk_delay,
                mode,
                reply,
            } => {
                self.dispatch_write(
                    service,
                    characteristic,
                    payload,
                    max_chunk,
                    inter_chunk_delay,
                    mode,
                    reply,
                )
                .await
            }
            Command::ReadDescriptor {
                service,
                characteristic,
                descriptor,
                reply,
            } => self.dispatch_descriptor_read(service, characteristic, descriptor, reply),
            Command::WriteDescriptor {
                service,
                characteristic,
                descriptor,
                payload,
                reply,
            } => {
                self.dispatch_descriptor_write(service, characteristic, descriptor, payload, reply)
            }
            Command::SetNotify {
                service,
                characteristic,
                fragment_count,
                enable,
                reply,
            } => self.dispatch_set_notify(service, characteristic, fragment_count, enable, reply),
            Command::ReadSignalStrength { reply } => self.dispatch_read_rssi(reply),
            Command::RequestMtu { size, reply } => self.dispatch_request_mtu(size, reply),
            Command::RequestPriority { hint, reply } => {
                let Some(channel) = self.connected_channel() else {
                    let _ = reply.send(Err(Error::NotConnected));
                    return Dispatch::Done;
                };
                let result = channel
                    .request_priority(hint)
                    .map_err(|_| Error::Rejected {
                        operation: "priority hint",
                    });
                let _ = reply.send(result);
                Dispatch::Done
            }
            Command::RefreshCache { reply } => {
                let Some(channel) = self.connected_channel() else {
                    let _ = reply.send(Err(Error::NotConnected));
                    return Dispatch::Done;
                };
                let result = channel.refresh_cache().map_err(|_| Error::Rejected {
                    operation: "refresh cache",
                });
                let _ = reply.send(result);
                Dispatch::Done
            }
        }
    }

    /// Returns the channel when the session is connected, `None` otherwise.
    fn connected_channel(&mut self) -> Option<&mut (dyn Channel + '_)> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        self.channel.as_deref_mut().map(|channel| channel as _)
    }

    fn dispatch_retrieve(&mut self, reply: Reply<Vec<Service>>) -> Dispatch {
        if self.connected_channel().is_none() {
            let _ = reply.send(Err(Error::NotConnected));
            return Dispatch::Done;
        }

        self.pending.discover = Some(reply);
        if self.discover_in_flight {
            // Share the result of the discovery already on the wire
            return Dispatch::Pending(OpKind::Discover);
        }

        let Some(channel) = self.connected_channel() else {
            return Dispatch::Done;
        };
        match channel.discover_entities() {
            Ok(()) => {
                self.discover_in_flight = true;
                Dispatch::Pending(OpKind::Discover)
            }
            Err(_) => {
                if let Some(reply) = self.pending.discover.take() {
                    let _ = reply.send(Err(Error::Rejected {
                        operation: "discover",
                    }));
                }
                Dispatch::Done
            }
        }
    }

    fn dispatch_read(&mut self, service: Uuid, characteristic: Uuid, reply: Reply<Bytes>) -> Dispatch {
        if self.connected_channel().is_none() {
            let _ = reply.send(Err(Error::NotConnected));
            return Dispatch::Done;
        }
        let instance = match resolve::find_service(&self.services, service)
            .and_then(|s| resolve::find_readable(s, characteristic))
        {
            Some(c) => c.instance,
            None => {
                let _ = reply.send(Err(Error::NotFound {
                    kind: EntityKind::Characteristic,
                    uuid: characteristic,
                }));
                return Dispatch::Done;
            }
        };

        self.pending.read = Some(reply);
        let Some(channel) = self.connected_channel() else {
            return Dispatch::Done;
        };
        if channel.read_characteristic(service, instance).is_err() {
            tracing::warn!("read of {characteristic} rejected");
            if let Some(reply) = self.pending.read.take() {
                let _ = reply.send(Err(Error::Rejected { operation: "read" }));
            }
            return Dispatch::Done;
        }
        Dispatch::Pending(OpKind::Read)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        payload: Bytes,
        max_chunk: usize,
        inter_chunk_delay: std::time::Duration,
        mode: WriteMode,
        reply: Reply<()>,
    ) -> Dispatch {
        if self.connected_channel().is_none() {
            let _ = reply.send(Err(Error::NotConnected));
            return Dispatch::Done;
        }

        let instance = match resolve::find_service(&self.services, service)
            .and_then(|s| resolve::find_writable(s, characteristic, mode))
        {
            Some(c) => c.instance,
            None => {
                let _ = reply.send(Err(Error::NotFound {
                    kind: EntityKind::Characteristic,
                    uuid: characteristic,
                }));
                return Dispatch::Done;
            }
        };

        let max_chunk = max_chunk.max(1);
        if payload.len() <= max_chunk {
            return self.submit_single_write(service, instance, payload, mode, reply);
        }

        let mut chunks: VecDeque<Bytes> = VecDeque::new();
        let mut offset = 0;
        while offset < payload.len() {
            let end = usize::min(offset + max_chunk, payload.len());
            chunks.push_back(payload.slice(offset..end));
            offset = end;
        }

        match mode {
            WriteMode::WithResponse => {
                // Splitting an oversized payload always yields two or more
                let Some(first) = chunks.pop_front() else {
                    let _ = reply.send(Ok(()));
                    return Dispatch::Done;
                };
                self.write_chunks = chunks;
                self.chunk_target = Some((service, instance));
                self.pending.write = Some(reply);

                let Some(channel) = self.connected_channel() else {
                    return Dispatch::Done;
                };
                if channel
                    .write_characteristic(service, instance, first, mode)
                    .is_err()
                {
                    tracing::warn!("chunked write to {characteristic} rejected");
                    self.write_chunks.clear();
                    self.chunk_target = None;
                    if let Some(reply) = self.pending.write.take() {
                        let _ = reply.send(Err(Error::Rejected { operation: "write" }));
                    }
                    return Dispatch::Done;
                }
                Dispatch::Pending(OpKind::Write)
            }
            WriteMode::WithoutResponse => {
                // Cooperative pause between chunks; this session's queue
                // makes no progress meanwhile
                let Some(channel) = self.channel.as_mut() else {
                    let _ = reply.send(Err(Error::NotConnected));
                    return Dispatch::Done;
                };
                for (i, chunk) in chunks.into_iter().enumerate() {
                    if i > 0 {
                        tokio::time::sleep(inter_chunk_delay).await;
                    }
                    if channel
                        .write_characteristic(service, instance, chunk, mode)
                        .is_err()
                    {
                        tracing::warn!("unacknowledged chunk {i} to {characteristic} rejected");
                        let _ = reply.send(Err(Error::Rejected { operation: "write" }));
                        return Dispatch::Done;
                    }
                }
                let _ = reply.send(Ok(()));
                Dispatch::Done
            }
        }
    }

    fn submit_single_write(
        &mut self,
        service: Uuid,
        instance: u16,
        payload: Bytes,
        mode: WriteMode,
        reply: Reply<()>,
    ) -> Dispatch {
        match mode {
            WriteMode::WithResponse => {
                self.pending.write = Some(reply);
                let Some(channel) = self.connected_channel() else {
                    if let Some(reply) = self.pending.write.take() {
                        let _ = reply.send(Err(Error::NotConnected));
                    }
                    return Dispatch::Done;
                };
                if channel
                    .write_characteristic(service, instance, payload, mode)
                    .is_err()
                {
                    if let Some(reply) = self.pending.write.take() {
                        let _ = reply.send(Err(Error::Rejected { operation: "write" }));
                    }
                    return Dispatch::Done;
                }
                Dispatch::Pending(OpKind::Write)
            }
            WriteMode::WithoutResponse => {
                // No asynchronous confirmation exists for this mode; the
                // completion fires on successful submission
                let Some(channel) = self.connected_channel() else {
                    let _ = reply.send(Err(Error::NotConnected));
                    return Dispatch::Done;
                };
                let result = channel
                    .write_characteristic(service, instance, payload, mode)
                    .map_err(|_| Error::Rejected { operation: "write" });
                let _ = reply.send(result);
                Dispatch::Done
            }
        }
    }

    fn dispatch_descriptor_read(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        reply: Reply<Bytes>,
    ) -> Dispatch {
        if self.connected_channel().is_none() {
            let _ = reply.send(Err(Error::NotConnected));
            return Dispatch::Done;
        }
        let found = resolve::find_service(&self.services, service)
            .and_then(|s| resolve::find_descriptor(s, characteristic, descriptor));
        let Some((c, _)) = found else {
            let _ = reply.send(Err(Error::NotFound {
                kind: EntityKind::Descriptor,
                uuid: descriptor,
            }));
            return Dispatch::Done;
        };
        let instance = c.instance;

        self.pending.descriptor_read = Some(reply);
        let Some(channel) = self.connected_channel() else {
            return Dispatch::Done;
        };
        if channel.read_descriptor(service, instance, descriptor).is_err() {
            tracing::warn!("descriptor read of {descriptor} rejected");
            if let Some(reply) = self.pending.descriptor_read.take() {
                let _ = reply.send(Err(Error::Rejected {
                    operation: "descriptor read",
                }));
            }
            return Dispatch::Done;
        }
        Dispatch::Pending(OpKind::DescriptorRead)
    }

    fn dispatch_descriptor_write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Bytes,
        reply: Reply<()>,
    ) -> Dispatch {
        if self.connected_channel().is_none() {
            let _ = reply.send(Err(Error::NotConnected));
            return Dispatch::Done;
        }
        let found = resolve::find_service(&self.services, service)
            .and_then(|s| resolve::find_descriptor(s, characteristic, descriptor));
        let Some((c, _)) = found else {
            let _ = reply.send(Err(Error::NotFound {
                kind: EntityKind::Descriptor,
                uuid: descriptor,
            }));
            return Dispatch::Done;
        };
        let instance = c.instance;

        self.pending.descriptor_write = Some(reply);
        let Some(channel) = self.connected_channel() else {
            return Dispatch::Done;
        };
        if channel
            .write_descriptor(service, instance, descriptor, payload)
            .is_err()
        {
            tracing::warn!("descriptor write of {descriptor} rejected");
            if let Some(reply) = self.pending.descriptor_write.take() {
                let _ = reply.send(Err(Error::Rejected {
                    operation: "descriptor write",
                }));
            }
            return Dispatch::Done;
        }
        Dispatch::Pending(OpKind::DescriptorWrite)
    }

    fn dispatch_set_notify(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        fragment_count: usize,
        enable: bool,
        reply: Reply<()>,
    ) -> Dispatch {
        if self.connected_channel().is_none() {
            let _ = reply.send(Err(Error::NotConnected));
            return Dispatch::Done;
        }

        if enable && fragment_count > 1 {
            tracing::debug!(
                "buffering notifications for {characteristic} ({fragment_count} fragments)"
            );
            self.buffers
                .insert((service, characteristic), NotifyBuffer::new(fragment_count));
        } else if !enable {
            self.buffers.remove(&(service, characteristic));
        }

        let found = resolve::find_service(&self.services, service)
            .and_then(|s| resolve::find_notifiable(s, characteristic));
        let Some((c, indication)) = found else {
            self.buffers.remove(&(service, characteristic));
            let _ = reply.send(Err(Error::NotFound {
                kind: EntityKind::Characteristic,
                uuid: characteristic,
            }));
            return Dispatch::Done;
        };
        let instance = c.instance;

        self.pending.notify = Some(reply);
        let Some(channel) = self.connected_channel() else {
            return Dispatch::Done;
        };
        if channel
            .set_notify(service, instance, enable, indication)
            .is_err()
        {
            tracing::warn!("notify configuration for {characteristic} rejected");
            self.buffers.remove(&(service, characteristic));
            if let Some(reply) = self.pending.notify.take() {
                let _ = reply.send(Err(Error::Rejected { operation: "notify" }));
            }
            return Dispatch::Done;
        }
        Dispatch::Pending(OpKind::Notify)
    }

    fn dispatch_read_rssi(&mut self, reply: Reply<i16>) -> Dispatch {
        self.pending.rssi = Some(reply);
        let Some(channel) = self.connected_channel() else {
            if let Some(reply) = self.pending.rssi.take() {
                let _ = reply.send(Err(Error::NotConnected));
            }
            return Dispatch::Done;
        };
        if channel.read_signal_strength().is_err() {
            if let Some(reply) = self.pending.rssi.take() {
                let _ = reply.send(Err(Error::Rejected {
                    operation: "signal strength",
                }));
            }
            return Dispatch::Done;
        }
        Dispatch::Pending(OpKind::Rssi)
    }

    fn dispatch_request_mtu(&mut self, size: u16, reply: Reply<u16>) -> Dispatch {
        self.pending.mtu = Some(reply);
        let Some(channel) = self.connected_channel() else {
            if let Some(reply) = self.pending.mtu.take() {
                let _ = reply.send(Err(Error::NotConnected));
            }
            return Dispatch::Done;
        };
        if channel.request_mtu(size).is_err() {
            if let Some(reply) = self.pending.mtu.take() {
                let _ = reply.send(Err(Error::Rejected {
                    operation: "payload size",
                }));
            }
            return Dispatch::Done;
        }
        Dispatch::Pending(OpKind::Mtu)
    }

    // ==================== Transport completions ====================

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::ConnectionChanged { connected, status } => {
                self.on_connection_changed(connected, status);
            }
            ChannelEvent::EntitiesDiscovered { status, services } => {
                self.on_entities_discovered(status, services).await;
            }
            ChannelEvent::CharacteristicRead { status, value } => {
                self.on_characteristic_read(status, value).await;
            }
            ChannelEvent::CharacteristicWritten { status } => {
                self.on_characteristic_written(status).await;
            }
            ChannelEvent::DescriptorRead { status, value } => {
                self.on_descriptor_read(status, value).await;
            }
            ChannelEvent::DescriptorWritten { status } => {
                self.on_descriptor_written(status).await;
            }
            ChannelEvent::NotifyConfigured { status } => {
                self.on_notify_configured(status).await;
            }
            ChannelEvent::Notification {
                service,
                characteristic,
                value,
            } => self.on_notification(service, characteristic, value),
            ChannelEvent::SignalStrength { status, rssi } => {
                self.on_signal_strength(status, rssi).await;
            }
            ChannelEvent::MtuChanged { status, mtu } => {
                self.on_mtu_changed(status, mtu).await;
            }
        }
    }

    async fn on_entities_discovered(&mut self, status: Status, services: Vec<Service>) {
        self.discover_in_flight = false;
        if status.is_success() {
            tracing::debug!("discovered {} services on {}", services.len(), self.peer);
            self.services = services;
        }
        if let Some(reply) = self.pending.discover.take() {
            let result = if status.is_success() {
                Ok(self.services.clone())
            } else {
                Err(Error::Gatt {
                    operation: "discover",
                    status,
                })
            };
            let _ = reply.send(result);
        }
        self.complete_if_current(OpKind::Discover).await;
    }

    async fn on_characteristic_read(&mut self, status: Status, value: Bytes) {
        if status.needs_bonding() {
            tracing::debug!("read completion suppressed, peer requires bonding");
            return;
        }
        if let Some(reply) = self.pending.read.take() {
            let result = if status.is_success() {
                Ok(value)
            } else {
                Err(Error::Gatt {
                    operation: "read",
                    status,
                })
            };
            let _ = reply.send(result);
        }
        self.complete_if_current(OpKind::Read).await;
    }

    async fn on_characteristic_written(&mut self, status: Status) {
        // Acknowledged fragmented write in progress: push the next chunk,
        // reusing the same completion
        if status.is_success() && !self.write_chunks.is_empty() {
            let Some(chunk) = self.write_chunks.pop_front() else {
                return;
            };
            let target = self.chunk_target;
            if let (Some(channel), Some((service, instance))) = (self.channel.as_mut(), target) {
                tracing::trace!("{} write chunks remaining", self.write_chunks.len());
                if channel
                    .write_characteristic(service, instance, chunk, WriteMode::WithResponse)
                    .is_ok()
                {
                    return;
                }
                tracing::warn!("follow-up write chunk rejected");
            }
            self.write_chunks.clear();
            self.chunk_target = None;
            if let Some(reply) = self.pending.write.take() {
                let _ = reply.send(Err(Error::Rejected { operation: "write" }));
            }
            self.complete_if_current(OpKind::Write).await;
            return;
        }

        if status.needs_bonding() {
            tracing::debug!("write completion suppressed, peer requires bonding");
            return;
        }

        if !status.is_success() {
            self.write_chunks.clear();
        }
        self.chunk_target = None;
        if let Some(reply) = self.pending.write.take() {
            let result = if status.is_success() {
                Ok(())
            } else {
                Err(Error::Gatt {
                    operation: "write",
                    status,
                })
            };
            let _ = reply.send(result);
        }
        self.complete_if_current(OpKind::Write).await;
    }

    async fn on_descriptor_read(&mut self, status: Status, value: Bytes) {
        if status.needs_bonding() {
            tracing::debug!("descriptor read completion suppressed, peer requires bonding");
            return;
        }
        if let Some(reply) = self.pending.descriptor_read.take() {
            let result = if status.is_success() {
                Ok(value)
            } else {
                Err(Error::Gatt {
                    operation: "descriptor read",
                    status,
                })
            };
            let _ = reply.send(result);
        }
        self.complete_if_current(OpKind::DescriptorRead).await;
    }

    async fn on_descriptor_written(&mut self, status: Status) {
        if status.needs_bonding() {
            tracing::debug!("descriptor write completion suppressed, peer requires bonding");
            return;
        }
        if let Some(reply) = self.pending.descriptor_write.take() {
            let result = if status.is_success() {
                Ok(())
            } else {
                Err(Error::Gatt {
                    operation: "descriptor write",
                    status,
                })
            };
            let _ = reply.send(result);
        }
        self.complete_if_current(OpKind::DescriptorWrite).await;
    }

    async fn on_notify_configured(&mut self, status: Status) {
        if status.needs_bonding() {
            tracing::debug!("notify completion suppressed, peer requires bonding");
            return;
        }
        if let Some(reply) = self.pending.notify.take() {
            let result = if status.is_success() {
                Ok(())
            } else {
                Err(Error::Gatt {
                    operation: "notify",
                    status,
                })
            };
            let _ = reply.send(result);
        }
        self.complete_if_current(OpKind::Notify).await;
    }

    async fn on_signal_strength(&mut self, status: Status, rssi: i16) {
        if status.needs_bonding() {
            tracing::debug!("signal strength completion suppressed, peer requires bonding");
            return;
        }
        if status.is_success() {
            self.rssi = Some(rssi);
        }
        if let Some(reply) = self.pending.rssi.take() {
            let result = if status.is_success() {
                Ok(rssi)
            } else {
                Err(Error::Gatt {
                    operation: "signal strength",
                    status,
                })
            };
            let _ = reply.send(result);
        }
        self.complete_if_current(OpKind::Rssi).await;
    }

    async fn on_mtu_changed(&mut self, status: Status, mtu: u16) {
        if status.needs_bonding() {
            tracing::debug!("payload size completion suppressed, peer requires bonding");
            return;
        }
        if status.is_success() {
            self.mtu = Some(mtu);
        }
        if let Some(reply) = self.pending.mtu.take() {
            let result = if status.is_success() {
                Ok(mtu)
            } else {
                Err(Error::Gatt {
                    operation: "payload size",
                    status,
                })
            };
            let _ = reply.send(result);
        }
        self.complete_if_current(OpKind::Mtu).await;
    }

    fn on_notification(&mut self, service: Uuid, characteristic: Uuid, value: Bytes) {
        let value = if let Some(buffer) = self.buffers.get_mut(&(service, characteristic)) {
            match buffer.push(value) {
                Some(whole) => whole,
                None => {
                    tracing::trace!(
                        "buffering notification fragment {} for {characteristic}",
                        buffer.len()
                    );
                    return;
                }
            }
        } else {
            value
        };

        self.dispatcher.dispatch(Event::NotificationValue {
            peer: self.peer,
            service,
            characteristic,
            value,
        });
    }
}

async fn recv_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
