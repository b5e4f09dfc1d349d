//! Session identity, state flags and the fixed-layout persisted record.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use rand::Rng;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::pool::Recycle;
use crate::tree::{Node, rotating_hash};

/// Length of a session identifier in bytes.
pub const ID_LEN: usize = 32;

/// Number of first-character classes (`0-9`, `A-Z`, `a-z`).
pub const ID_CLASSES: usize = 62;

/// True if `s` is exactly 32 ASCII alphanumeric characters.
pub fn is_valid_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// A 32-character alphanumeric session identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; ID_LEN]);

impl SessionId {
    /// Parse and validate an identifier.
    pub fn parse(s: &str) -> Result<Self> {
        if !is_valid_id(s) {
            return Err(Error::InvalidId(s.to_string()));
        }
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }

    /// Generate a random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_LEN];
        for (slot, b) in bytes
            .iter_mut()
            .zip(rand::rng().sample_iter(&rand::distr::Alphanumeric))
        {
            *slot = b;
        }
        Self(bytes)
    }

    pub(crate) fn from_raw(bytes: [u8; ID_LEN]) -> Result<Self> {
        if !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::Corrupt("session id in record is not alphanumeric".into()));
        }
        Ok(Self(bytes))
    }

    pub fn as_str(&self) -> &str {
        // Constructors only admit ASCII alphanumerics.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Case-sensitive rotating hash used for cache bucket selection.
    pub fn hash32(&self) -> u32 {
        rotating_hash(&self.0, false)
    }

    /// Class of the first character, in `0..ID_CLASSES`.
    pub fn class(&self) -> usize {
        match self.0[0] {
            b @ b'0'..=b'9' => (b - b'0') as usize,
            b @ b'A'..=b'Z' => 10 + (b - b'A') as usize,
            b @ b'a'..=b'z' => 36 + (b - b'a') as usize,
            _ => 0,
        }
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self([b'0'; ID_LEN])
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.as_str())
    }
}

/// Lifecycle flags carried by a session between start and close.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState(u8);

impl SessionState {
    /// Freshly created, never persisted or cached.
    pub const CREATED: Self = Self(1 << 0);
    /// Read back from the session directory.
    pub const LOADED: Self = Self(1 << 1);
    /// Modified by a setter since start.
    pub const CHANGED: Self = Self(1 << 2);
    /// Written to disk since last change.
    pub const SAVED: Self = Self(1 << 3);
    /// Resident in the session cache.
    pub const CACHED: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::CREATED, "created"),
        (Self::LOADED, "loaded"),
        (Self::CHANGED, "changed"),
        (Self::SAVED, "saved"),
        (Self::CACHED, "cached"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SessionState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// In-memory session state: fixed metadata plus the value tree.
#[derive(Debug)]
pub struct SessionRecord {
    pub id: SessionId,
    /// Client address the session is bound to, if any.
    pub client: Option<SocketAddr>,
    /// Hash of the bound client's user agent.
    pub user_agent: u32,
    /// Authenticated user, 0 when anonymous.
    pub user_id: u32,
    pub created_at: i64,
    pub opened_at: i64,
    pub timeout: i64,
    pub lifetime: i64,
    pub state: SessionState,
    pub tree: Node,
    /// Cache slot back-reference. Never persisted.
    pub(crate) slot: Option<u32>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            id: SessionId::default(),
            client: None,
            user_agent: 0,
            user_id: 0,
            created_at: 0,
            opened_at: 0,
            timeout: 0,
            lifetime: 0,
            state: SessionState::empty(),
            tree: Node::root(),
            slot: None,
        }
    }
}

impl Recycle for SessionRecord {
    fn recycle(&mut self) {
        self.id = SessionId::default();
        self.client = None;
        self.user_agent = 0;
        self.user_id = 0;
        self.created_at = 0;
        self.opened_at = 0;
        self.timeout = 0;
        self.lifetime = 0;
        self.state = SessionState::empty();
        self.tree.clear();
        self.slot = None;
    }
}

impl SessionRecord {
    /// Serialize the fixed metadata into the on-disk header layout.
    pub(crate) fn to_header(&self) -> RecordHeader {
        let (family, port, addr) = match self.client {
            None => (0, 0, [0u8; 16]),
            Some(sock) => {
                let mut addr = [0u8; 16];
                let family = match sock.ip() {
                    IpAddr::V4(v4) => {
                        addr[..4].copy_from_slice(&v4.octets());
                        4
                    }
                    IpAddr::V6(v6) => {
                        addr.copy_from_slice(&v6.octets());
                        6
                    }
                };
                (family, sock.port(), addr)
            }
        };

        RecordHeader {
            id: self.id.0,
            family,
            _pad: 0,
            port,
            addr,
            user_agent: self.user_agent,
            user_id: self.user_id,
            _reserved: 0,
            created_at: self.created_at,
            opened_at: self.opened_at,
            timeout: self.timeout,
            lifetime: self.lifetime,
        }
    }

    /// Overwrite the fixed metadata from a decoded header.
    pub(crate) fn apply_header(&mut self, header: &RecordHeader) -> Result<()> {
        self.id = SessionId::from_raw(header.id)?;
        self.client = match header.family {
            0 => None,
            4 => {
                let ip = Ipv4Addr::new(header.addr[0], header.addr[1], header.addr[2], header.addr[3]);
                Some(SocketAddr::new(IpAddr::V4(ip), header.port))
            }
            6 => Some(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(header.addr)),
                header.port,
            )),
            other => {
                return Err(Error::Corrupt(format!("unknown address family {other}")));
            }
        };
        self.user_agent = header.user_agent;
        self.user_id = header.user_id;
        self.created_at = header.created_at;
        self.opened_at = header.opened_at;
        self.timeout = header.timeout;
        self.lifetime = header.lifetime;
        Ok(())
    }
}

/// Fixed on-disk record. Field order and widths are the file format.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub(crate) struct RecordHeader {
    pub id: [u8; ID_LEN],
    pub family: u8,
    pub _pad: u8,
    pub port: u16,
    pub addr: [u8; 16],
    pub user_agent: u32,
    pub user_id: u32,
    pub _reserved: u32,
    pub created_at: i64,
    pub opened_at: i64,
    pub timeout: i64,
    pub lifetime: i64,
}

/// Size of the persisted record. A stored size that differs is corruption.
pub const RECORD_SIZE: usize = std::mem::size_of::<RecordHeader>();

const _: () = assert!(RECORD_SIZE == 96);

impl RecordHeader {
    pub(crate) fn read(bytes: &[u8]) -> Result<Self> {
        Self::read_from_bytes(bytes)
            .map_err(|_| Error::Corrupt(format!("record block is not {RECORD_SIZE} bytes")))
    }
}
