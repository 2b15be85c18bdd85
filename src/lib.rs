//! Serialized GATT client sessions for BLE peripherals.
//!
//! This crate manages one peer per [`Session`]: commands submitted through
//! the handle execute strictly one at a time against a [`Transport`], with
//! completions delivered back as the transport reports them. On top of the
//! single in-flight pipeline it provides property-aware characteristic
//! resolution, payload fragmentation for large writes, and reassembly of
//! fragmented notifications.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use gattcore::{Session, Transport, WriteMode, DEFAULT_MAX_CHUNK};
//!
//! async fn run(transport: impl Transport + 'static) -> Result<(), gattcore::Error> {
//!     let peer = "aa:bb:cc:dd:ee:ff".parse()?;
//!     let session = Session::spawn(peer, transport);
//!
//!     session.connect().await?;
//!     let services = session.retrieve_entities().await?;
//!     println!("{} services", services.len());
//!
//!     let service: gattcore::Uuid = "0000180f-0000-1000-8000-00805f9b34fb".parse()?;
//!     let characteristic: gattcore::Uuid = "00002a19-0000-1000-8000-00805f9b34fb".parse()?;
//!     let level = session.read(service, characteristic).await?;
//!     println!("battery: {level:?}");
//!
//!     session
//!         .write(
//!             service,
//!             characteristic,
//!             bytes::Bytes::from_static(b"\x01"),
//!             DEFAULT_MAX_CHUNK,
//!             Duration::from_millis(30),
//!             WriteMode::WithResponse,
//!         )
//!         .await?;
//!
//!     session.disconnect(false).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod event;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{EntityKind, Error, Result};
pub use event::{Event, EventDispatcher, Subscription};
pub use session::{Session, DEFAULT_MAX_CHUNK};
pub use transport::{Channel, ChannelEvent, SubmitError, Transport};
pub use types::{
    CharProps, Characteristic, ConnectionState, Descriptor, PeerAddr, PriorityHint, Service,
    Status, Uuid, WriteMode,
};
