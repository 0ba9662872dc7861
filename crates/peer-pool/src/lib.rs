//! # Topic Peer Pool
//!
//! Topic-scoped peer discovery and connection pool management.
//!
//! For every topic a node cares about, the pool keeps the number of
//! connected peers between a configured `min` and `max`:
//!
//! - **Discovery:** nodes advertising the topic are found through the
//!   discovery subsystem, polled fast while under-subscribed and slowly
//!   once satisfied.
//! - **Admission:** found nodes are dialed while there is spare capacity and
//!   queued by discovery recency otherwise. Peers connecting past `max` are
//!   dismissed.
//! - **Backfill:** a dropped slot is refilled from the freshest unexpired
//!   candidate.
//! - **Cache:** connected peers are persisted and used to seed the next
//!   search.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** Peer records, limits and the per-topic table
//! - **Ports Layer:** Discovery, connection manager, storage, clock, signals
//! - **Service Layer:** `SyncStrategy`, `TopicPool`, `PeerPool`, `Register`
//! - **Adapters Layer:** Peer cache, stores, config, signals, clock
//!
//! ## Example
//!
//! ```rust
//! use peer_pool::{Limits, PeerPool, PeerPoolConfig};
//!
//! let config = PeerPoolConfig::default()
//!     .with_topic("whisper", Limits::new(2, 3))
//!     .with_stop_on_max(true);
//! assert!(config.validate().is_ok());
//!
//! let pool = PeerPool::new(config);
//! assert!(!pool.is_running());
//! ```

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

// =============================================================================
// FEATURE-GATED MODULES
// =============================================================================

/// Test utilities (ControllableTimeSource, FakeConnector, etc.)
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Domain entities
pub use domain::{
    CandidateQueue, Endpoint, Limits, NodeId, NodeRecord, PeerRecord, SyncMode, Timestamp, Topic,
    TopicStats, TopicTable,
};

// Errors
pub use domain::{CacheError, ConfigError, DiscoveryError, KVStoreError, PeerPoolError};

// Defaults
pub use domain::{
    DEFAULT_CACHE_PREFETCH, DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_EXPIRATION_PERIOD,
    DEFAULT_FAST_SYNC, DEFAULT_SLOW_SYNC, DEFAULT_TOPIC_FAST_MODE_TIMEOUT,
};

// Port traits
pub use ports::{
    ConnectionManager, Connector, Discovery, KeyValueStore, PeerEvent, Signal, SignalSink,
    TimeSource,
};

// Services
pub use service::{PeerPool, Register, SyncPeriods, SyncStrategy, SyncUpdater, TopicPool};

// Adapters
pub use adapters::{
    CallbackSignalSink, InMemoryKVStore, MonotonicTimeSource, NoOpSignalSink, PeerCache,
    PeerPoolConfig, SignalEnvelope,
};

#[cfg(feature = "rocksdb")]
pub use adapters::{RocksDbConfig, RocksDbStore};
