//! # Driven Ports (Outbound SPI)
//!
//! Interfaces the embedding node must provide: the discovery subsystem,
//! the connection manager, a byte-ordered key-value store, a clock and a
//! sink for notifications to the host application.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

use crate::domain::{DiscoveryError, KVStoreError, NodeId, NodeRecord, Timestamp, Topic};

/// Topic discovery over the wire protocol.
///
/// # Example Implementation
///
/// ```rust,ignore
/// #[async_trait]
/// impl Discovery for V5Discovery {
///     async fn search_topic(&self, topic: Topic, mut period: mpsc::Receiver<Duration>,
///         found: mpsc::Sender<NodeRecord>, lookup: mpsc::Sender<bool>) -> Result<(), DiscoveryError> {
///         let mut every = DEFAULT_SLOW_SYNC;
///         loop {
///             // re-query on every tick, adopt new periods as they arrive,
///             // return Ok(()) once `period` is closed
///         }
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Whether the discovery subsystem is currently running.
    fn running(&self) -> bool;

    /// Start the discovery subsystem. Starting a running subsystem is a no-op.
    fn start(&self) -> Result<(), DiscoveryError>;

    /// Shut the discovery subsystem down.
    fn stop(&self) -> Result<(), DiscoveryError>;

    /// Advertise this node under `topic` until `stop` becomes `true` or its
    /// sender is dropped.
    async fn register_topic(
        &self,
        topic: Topic,
        stop: watch::Receiver<bool>,
    ) -> Result<(), DiscoveryError>;

    /// Search `topic`, sending every node found on `found`.
    ///
    /// Lookups are paced by the most recent value received on `period`. The
    /// search ends when `period` is closed. Each lookup round reports on
    /// `lookup` (`true` when it begins, `false` when it settles).
    async fn search_topic(
        &self,
        topic: Topic,
        period: mpsc::Receiver<Duration>,
        found: mpsc::Sender<NodeRecord>,
        lookup: mpsc::Sender<bool>,
    ) -> Result<(), DiscoveryError>;
}

/// Connect or drop notification from the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A session with the peer was established.
    Connected {
        /// Remote node.
        id: NodeId,
    },
    /// A session with the peer ended.
    Dropped {
        /// Remote node.
        id: NodeId,
        /// Reason reported by the transport, if any.
        error: Option<String>,
    },
}

impl PeerEvent {
    /// Node the event is about.
    pub fn id(&self) -> NodeId {
        match self {
            PeerEvent::Connected { id } | PeerEvent::Dropped { id, .. } => *id,
        }
    }
}

/// Session management for remote peers.
///
/// Dial and drop requests are asynchronous: their outcome arrives later as
/// a [`PeerEvent`].
pub trait ConnectionManager: Send + Sync {
    /// Identity of the local node.
    fn self_id(&self) -> NodeId;

    /// Request a session with `node`.
    fn add_peer(&self, node: &NodeRecord);

    /// Request that the session with `node` be closed.
    fn remove_peer(&self, node: &NodeRecord);

    /// Subscribe to connect and drop events.
    fn subscribe_events(&self) -> broadcast::Receiver<PeerEvent>;

    /// Currently connected peers.
    fn peers_info(&self) -> Vec<NodeRecord>;
}

/// Everything the pools need from the node: discovery plus sessions.
pub trait Connector: Discovery + ConnectionManager {}

impl<T: Discovery + ConnectionManager + ?Sized> Connector for T {}

/// Byte-key / byte-value store with byte-ordered prefix iteration.
///
/// Methods take `&self`; implementations serialise concurrent writers.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Up to `limit` entries whose key starts with `prefix`, in key order.
    fn prefix_scan(&self, prefix: &[u8], limit: usize)
        -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;
}

/// Monotonic clock.
///
/// Enables deterministic testing by injecting a controllable time source.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp.
    fn now(&self) -> Timestamp;
}

/// Notification for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Discovery was (re)started.
    DiscoveryStarted,
    /// Discovery was shut down.
    DiscoveryStopped,
    /// Connected peers after a connect or drop was handled.
    DiscoverySummary(Vec<NodeRecord>),
}

/// Outward notification delivery. Must not block.
pub trait SignalSink: Send + Sync {
    /// Deliver a signal, fire-and-forget.
    fn send(&self, signal: Signal);
}
