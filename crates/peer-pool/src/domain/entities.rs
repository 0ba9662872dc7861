//! Core Domain Entities for the Peer Pool
//!
//! Identity, addressing and per-topic bookkeeping records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// 256-bit node identifier.
///
/// Opaque to this crate: the discovery subsystem and the connection manager
/// agree on how it is derived. Ordering is byte order, which is also the
/// order the peer cache returns records in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Length of the identifier in bytes.
    pub const LEN: usize = 32;

    /// Create a NodeId from raw 32-byte array.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a NodeId from a byte slice of exactly [`NodeId::LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    /// Abbreviated hex form used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Network location of a remote node.
///
/// Discovery runs over UDP while sessions are TCP, so both ports are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// IP address (v4 or v6).
    pub ip: IpAddr,
    /// Discovery (UDP) port.
    pub udp_port: u16,
    /// Session (TCP) port.
    pub tcp_port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(ip: IpAddr, udp_port: u16, tcp_port: u16) -> Self {
        Self {
            ip,
            udp_port,
            tcp_port,
        }
    }

    /// Address used to open a session with the node.
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }

    /// Address used by the discovery protocol.
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (udp {})", self.tcp_addr(), self.udp_port)
    }
}

/// Everything needed to dial a node without rediscovering it.
///
/// This is what the discovery subsystem yields and what the peer cache
/// persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node identifier.
    pub id: NodeId,
    /// Where to reach it.
    pub endpoint: Endpoint,
}

impl NodeRecord {
    /// Create a node record.
    pub fn new(id: NodeId, endpoint: Endpoint) -> Self {
        Self { id, endpoint }
    }
}

/// Logical interest tag scoping discovery and connection limits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Topic name as raw bytes (cache key component).
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Monotonic timestamp in milliseconds.
///
/// Only meaningful relative to other timestamps from the same `TimeSource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the time source origin.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add a duration (saturating).
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

/// One discovered remote node, as tracked by a single topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Identity and address.
    pub node: NodeRecord,
    /// Last (re)discovery time. Drives both expiry and ranking.
    pub discovered_at: Timestamp,
    /// The connection manager reports this peer as connected for this topic.
    pub connected: bool,
    /// We asked the connection manager to drop this peer ourselves.
    pub dismissed: bool,
}

impl PeerRecord {
    /// Create a freshly discovered, unconnected record.
    pub fn new(node: NodeRecord, discovered_at: Timestamp) -> Self {
        Self {
            node,
            discovered_at,
            connected: false,
            dismissed: false,
        }
    }

    /// Node identifier.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// A record is eligible for dialing only while `now < discovered_at + window`.
    pub fn is_expired(&self, now: Timestamp, window: Duration) -> bool {
        now >= self.discovered_at.saturating_add(window)
    }
}
