//! Data structures shared across the library.
//!
//! Identifiers ([`Uuid`], [`PeerAddr`]), capability flags ([`CharProps`]),
//! transport completion statuses ([`Status`]) and the discovered entity
//! tree ([`Service`], [`Characteristic`], [`Descriptor`]).

use crate::error::Error;

/// Length of a UUID in bytes.
pub const UUID_LEN: usize = 16;

/// Length of a peer address in bytes.
pub const PEER_ADDR_LEN: usize = 6;

/// A 128-bit identifier for a service, characteristic or descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uuid([u8; UUID_LEN]);

impl Uuid {
    /// Creates a UUID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; UUID_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a UUID from a `u128` value (big-endian byte order).
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_be_bytes())
    }

    /// Returns the UUID as a byte slice.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parses a UUID from a string.
    ///
    /// Accepts the hyphenated form (`0000180f-0000-1000-8000-00805f9b34fb`)
    /// or 32 bare hex characters.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let compact: String = s.chars().filter(|c| *c != '-').collect();
        let bytes =
            hex::decode(&compact).map_err(|_| Error::InvalidUuid(s.to_string()))?;
        if bytes.len() != UUID_LEN {
            return Err(Error::InvalidUuid(s.to_string()));
        }
        let mut uuid = [0u8; UUID_LEN];
        uuid.copy_from_slice(&bytes);
        Ok(Self(uuid))
    }
}

impl std::str::FromStr for Uuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &hex[..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..]
        )
    }
}

impl std::fmt::Debug for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Uuid({self})")
    }
}

/// A 6-byte peer device address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr([u8; PEER_ADDR_LEN]);

impl PeerAddr {
    /// Creates a peer address from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PEER_ADDR_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the address as a byte slice.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parses an address from colon-separated hex (`aa:bb:cc:dd:ee:ff`).
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid address.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let compact: String = s.chars().filter(|c| *c != ':').collect();
        let bytes =
            hex::decode(&compact).map_err(|_| Error::InvalidAddress(s.to_string()))?;
        if bytes.len() != PEER_ADDR_LEN {
            return Err(Error::InvalidAddress(s.to_string()));
        }
        let mut addr = [0u8; PEER_ADDR_LEN];
        addr.copy_from_slice(&bytes);
        Ok(Self(addr))
    }
}

impl std::str::FromStr for PeerAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl std::fmt::Debug for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerAddr({self})")
    }
}

/// Characteristic capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharProps(u8);

impl CharProps {
    /// No capabilities.
    pub const NONE: Self = Self(0);

    /// Characteristic can be read.
    pub const READ: Self = Self(1 << 1);

    /// Characteristic can be written without acknowledgement.
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(1 << 2);

    /// Characteristic can be written with acknowledgement.
    pub const WRITE: Self = Self(1 << 3);

    /// Characteristic supports unacknowledged notifications.
    pub const NOTIFY: Self = Self(1 << 4);

    /// Characteristic supports acknowledged indications.
    pub const INDICATE: Self = Self(1 << 5);

    /// Creates flags from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if a capability is present.
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    /// Combines two capability sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Write submission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Each write is confirmed asynchronously by the peer.
    WithResponse,
    /// Writes are submitted without any confirmation.
    WithoutResponse,
}

/// Connection priority hint passed through to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PriorityHint {
    /// Balanced throughput and power use.
    #[default]
    Balanced,
    /// Low latency, higher power use.
    High,
    /// Reduced power use, higher latency.
    LowPower,
}

/// Completion status reported by the transport.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Status(u8);

impl Status {
    /// Operation completed successfully.
    pub const SUCCESS: Self = Self(0);

    /// The peer requires authentication before the operation can proceed.
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(5);

    /// Authentication with the peer failed.
    pub const AUTH_FAIL: Self = Self(137);

    /// Creates a status from a raw code.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        Self(code)
    }

    /// Returns the raw status code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }

    /// Returns true for a successful completion.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Returns true if the status indicates a pending bonding requirement.
    ///
    /// Completions with such a status are suppressed rather than surfaced;
    /// the peer is expected to resolve bonding out of band.
    #[must_use]
    pub const fn needs_bonding(self) -> bool {
        self.0 == Self::INSUFFICIENT_AUTHENTICATION.0 || self.0 == Self::AUTH_FAIL.0
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Status({})", self.0)
    }
}

/// Session connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; a new `connect` is required.
    #[default]
    Disconnected,
    /// A channel has been acquired; waiting for the transport to confirm.
    Connecting,
    /// The link is up and commands may execute.
    Connected,
}

/// A descriptor attached to a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Descriptor identifier.
    pub uuid: Uuid,
}

/// A characteristic within a service.
///
/// Peers may expose the same UUID on several characteristics; `instance`
/// disambiguates them when addressing the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Characteristic identifier.
    pub uuid: Uuid,
    /// Instance handle, unique within the peer.
    pub instance: u16,
    /// Capability flags.
    pub props: CharProps,
    /// Attached descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// A discovered service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Service identifier.
    pub uuid: Uuid,
    /// Characteristics exposed by this service.
    pub characteristics: Vec<Characteristic>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_parse_hyphenated() {
        let uuid = Uuid::parse("0000180f-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(uuid.to_string(), "0000180f-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_uuid_parse_bare() {
        let bare = Uuid::parse("0000180f00001000800000805f9b34fb").unwrap();
        let hyphenated = Uuid::parse("0000180f-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(bare, hyphenated);
    }

    #[test]
    fn test_uuid_parse_invalid() {
        assert!(Uuid::parse("not-a-uuid").is_err());
        assert!(Uuid::parse("180f").is_err());
    }

    #[test]
    fn test_uuid_from_u128() {
        let uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);
        assert_eq!(uuid.to_string(), "0000180f-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_peer_addr_roundtrip() {
        let addr = PeerAddr::parse("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(addr.to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(addr.as_bytes(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_peer_addr_invalid() {
        assert!(PeerAddr::parse("aa:bb:cc").is_err());
        assert!(PeerAddr::parse("zz:bb:cc:dd:ee:ff").is_err());
    }

    #[test]
    fn test_char_props() {
        let props = CharProps::READ.union(CharProps::NOTIFY);
        assert!(props.contains(CharProps::READ));
        assert!(props.contains(CharProps::NOTIFY));
        assert!(!props.contains(CharProps::WRITE));
        assert!(!props.contains(CharProps::INDICATE));
    }

    #[test]
    fn test_status() {
        assert!(Status::SUCCESS.is_success());
        assert!(!Status::from_code(133).is_success());
        assert!(Status::INSUFFICIENT_AUTHENTICATION.needs_bonding());
        assert!(Status::AUTH_FAIL.needs_bonding());
        assert!(!Status::SUCCESS.needs_bonding());
    }
}
