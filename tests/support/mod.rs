//! In-memory transport for session tests.
//!
//! Every submission is recorded in a shared [`LinkState`]; tests drive
//! completions by sending [`ChannelEvent`]s through the sender the session
//! handed to [`Transport::open_channel`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use gattcore::{
    Channel, ChannelEvent, CharProps, Characteristic, Descriptor, PeerAddr, PriorityHint, Service,
    Session, Status, SubmitError, Transport, Uuid, WriteMode,
};

pub const SVC_BATTERY: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);
pub const CHAR_LEVEL: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);
pub const DESC_CCCD: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);

/// One call recorded against the fake channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Discover,
    Read {
        service: Uuid,
        instance: u16,
    },
    Write {
        service: Uuid,
        instance: u16,
        value: Bytes,
        mode: WriteMode,
    },
    DescriptorRead {
        descriptor: Uuid,
    },
    DescriptorWrite {
        descriptor: Uuid,
        value: Bytes,
    },
    SetNotify {
        instance: u16,
        enable: bool,
        indication: bool,
    },
    ReadRssi,
    RequestMtu(u16),
    Priority(PriorityHint),
    Refresh,
}

#[derive(Default)]
pub struct LinkState {
    pub events: Option<mpsc::Sender<ChannelEvent>>,
    pub submissions: Vec<Submission>,
    pub reject_all: bool,
    pub close_calls: usize,
}

pub type SharedLink = Arc<Mutex<LinkState>>;

pub struct FakeTransport {
    pub link: SharedLink,
    pub fail_open: bool,
}

impl FakeTransport {
    pub fn new() -> (Self, SharedLink) {
        let link = Arc::new(Mutex::new(LinkState::default()));
        (
            Self {
                link: link.clone(),
                fail_open: false,
            },
            link,
        )
    }
}

impl Transport for FakeTransport {
    fn open_channel(
        &mut self,
        _peer: PeerAddr,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<Box<dyn Channel>, SubmitError> {
        if self.fail_open {
            return Err(SubmitError);
        }
        let mut link = self.link.lock().unwrap();
        link.events = Some(events);
        Ok(Box::new(FakeChannel {
            link: self.link.clone(),
        }))
    }
}

pub struct FakeChannel {
    link: SharedLink,
}

impl FakeChannel {
    fn record(&mut self, submission: Submission) -> Result<(), SubmitError> {
        let mut link = self.link.lock().unwrap();
        if link.reject_all {
            return Err(SubmitError);
        }
        link.submissions.push(submission);
        Ok(())
    }
}

impl Channel for FakeChannel {
    fn discover_entities(&mut self) -> Result<(), SubmitError> {
        self.record(Submission::Discover)
    }

    fn read_characteristic(&mut self, service: Uuid, instance: u16) -> Result<(), SubmitError> {
        self.record(Submission::Read { service, instance })
    }

    fn write_characteristic(
        &mut self,
        service: Uuid,
        instance: u16,
        value: Bytes,
        mode: WriteMode,
    ) -> Result<(), SubmitError> {
        self.record(Submission::Write {
            service,
            instance,
            value,
            mode,
        })
    }

    fn read_descriptor(
        &mut self,
        _service: Uuid,
        _instance: u16,
        descriptor: Uuid,
    ) -> Result<(), SubmitError> {
        self.record(Submission::DescriptorRead { descriptor })
    }

    fn write_descriptor(
        &mut self,
        _service: Uuid,
        _instance: u16,
        descriptor: Uuid,
        value: Bytes,
    ) -> Result<(), SubmitError> {
        self.record(Submission::DescriptorWrite { descriptor, value })
    }

    fn set_notify(
        &mut self,
        _service: Uuid,
        instance: u16,
        enable: bool,
        indication: bool,
    ) -> Result<(), SubmitError> {
        self.record(Submission::SetNotify {
            instance,
            enable,
            indication,
        })
    }

    fn read_signal_strength(&mut self) -> Result<(), SubmitError> {
        self.record(Submission::ReadRssi)
    }

    fn request_mtu(&mut self, size: u16) -> Result<(), SubmitError> {
        self.record(Submission::RequestMtu(size))
    }

    fn request_priority(&mut self, hint: PriorityHint) -> Result<(), SubmitError> {
        self.record(Submission::Priority(hint))
    }

    fn refresh_cache(&mut self) -> Result<(), SubmitError> {
        self.record(Submission::Refresh)
    }

    fn close(&mut self) {
        let mut link = self.link.lock().unwrap();
        link.close_calls += 1;
    }
}

/// A battery service tree with one readable, writable, notifiable level
/// characteristic carrying a client configuration descriptor.
pub fn battery_services() -> Vec<Service> {
    vec![Service {
        uuid: SVC_BATTERY,
        characteristics: vec![Characteristic {
            uuid: CHAR_LEVEL,
            instance: 3,
            props: CharProps::READ
                .union(CharProps::WRITE)
                .union(CharProps::WRITE_WITHOUT_RESPONSE)
                .union(CharProps::NOTIFY),
            descriptors: vec![Descriptor { uuid: DESC_CCCD }],
        }],
    }]
}

pub fn peer() -> PeerAddr {
    PeerAddr::from_bytes([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
}

/// Sends a completion event through the link.
pub async fn emit(link: &SharedLink, event: ChannelEvent) {
    let sender = link
        .lock()
        .unwrap()
        .events
        .clone()
        .expect("no channel open");
    sender.send(event).await.expect("session gone");
}

pub fn submissions(link: &SharedLink) -> Vec<Submission> {
    link.lock().unwrap().submissions.clone()
}

/// Polls until the link has recorded at least `count` submissions.
pub async fn wait_for_submissions(link: &SharedLink, count: usize) -> Vec<Submission> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        let current = submissions(link);
        if current.len() >= count {
            return current;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} submissions, got {current:?}"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Polls until the transport has handed out an event sender.
pub async fn wait_for_channel(link: &SharedLink) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while link.lock().unwrap().events.is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for channel"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Connects the session, leaving the automatic discovery unanswered.
pub async fn connect_only(session: &Session, link: &SharedLink) {
    let handle = {
        let session = session.clone();
        tokio::spawn(async move { session.connect().await })
    };
    wait_for_channel(link).await;
    emit(
        link,
        ChannelEvent::ConnectionChanged {
            connected: true,
            status: Status::SUCCESS,
        },
    )
    .await;
    handle.await.unwrap().expect("connect failed");
}

/// Connects the session and completes the automatic discovery with the
/// battery service tree.
pub async fn connect_and_discover(session: &Session, link: &SharedLink) {
    connect_only(session, link).await;
    wait_for_submissions(link, 1).await;
    emit(
        link,
        ChannelEvent::EntitiesDiscovered {
            status: Status::SUCCESS,
            services: battery_services(),
        },
    )
    .await;
    // Let the session cache the tree before tests resolve against it
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while session.services().await.expect("session gone").is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for discovery"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
