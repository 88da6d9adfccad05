//! Core types shared by the cache engine and its callers

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Length of a BLAKE3 digest rendered as lowercase hex
pub const BLAKE3_HEX_LEN: usize = 64;

/// Opaque, immutable, content-derived identifier of a blob.
///
/// Equality and ordering are plain byte comparisons. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference(Bytes);

impl Reference {
    /// Wrap raw reference bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Derive the reference for a blob: lowercase hex BLAKE3 digest of its bytes
    pub fn for_content(data: &[u8]) -> Self {
        Self(Bytes::from(blake3::hash(data).to_hex().to_string()))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this reference has the shape produced by [`Reference::for_content`]
    pub fn is_content_hash(&self) -> bool {
        self.0.len() == BLAKE3_HEX_LEN
            && self.0.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Check `data` against this reference.
    ///
    /// Returns `None` when the reference is not a content hash we know how to
    /// verify, otherwise whether the data hashes to it.
    pub fn verify(&self, data: &[u8]) -> Option<bool> {
        if !self.is_content_hash() {
            return None;
        }
        Some(blake3::hash(data).to_hex().as_bytes() == self.as_bytes())
    }
}

impl From<&str> for Reference {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Reference {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Reference {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => f.write_str(s),
            _ => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", self)
    }
}

/// How a remote endpoint is reached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// No endpoint configured yet
    Unassigned,
    /// In-process store (tests, embedded setups)
    InProcess,
    /// Networked store
    Remote,
}

/// Address of a specific backend store instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub transport: Transport,
    pub net_addr: String,
}

impl Endpoint {
    pub fn new(transport: Transport, net_addr: impl Into<String>) -> Self {
        Self {
            transport,
            net_addr: net_addr.into(),
        }
    }

    pub fn remote(net_addr: impl Into<String>) -> Self {
        Self::new(Transport::Remote, net_addr)
    }

    pub fn in_process() -> Self {
        Self::new(Transport::InProcess, "")
    }

    pub const fn unassigned() -> Self {
        Self {
            transport: Transport::Unassigned,
            net_addr: String::new(),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.transport != Transport::Unassigned
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            Transport::Unassigned => f.write_str("unassigned"),
            Transport::InProcess => f.write_str("inprocess"),
            Transport::Remote => write!(f, "remote,{}", self.net_addr),
        }
    }
}

/// Alternate place a blob can be fetched from
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub endpoint: Endpoint,
    pub reference: Reference,
}

/// Answer of a remote Get: either the bytes or a list of places to look instead
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched {
    /// Inline blob contents
    Data(Bytes),
    /// No data; the caller must follow one of these locations
    Redirect(Vec<Location>),
}

impl Fetched {
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Fetched::Data(data) => Some(data),
            Fetched::Redirect(_) => None,
        }
    }

    pub fn locations(&self) -> Option<&[Location]> {
        match self {
            Fetched::Data(_) => None,
            Fetched::Redirect(locations) => Some(locations),
        }
    }
}

/// Metadata returned alongside a reference by the server facade
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Refdata {
    pub reference: Reference,
    /// Whether the blob may change under the same reference (never, for a
    /// content-addressed store)
    pub volatile: bool,
    /// How long the caller may cache the blob; zero means no limit given
    pub duration_secs: u64,
}

impl Refdata {
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            volatile: false,
            duration_secs: 0,
        }
    }
}
