//! # Adapters Layer
//!
//! - `cache` - Durable peer cache over any `KeyValueStore`
//! - `storage` - In-memory and RocksDB (`rocksdb` feature) stores
//! - `signal` - JSON notifications for the host application
//! - `config` - `PeerPoolConfig` and TOML loading
//! - `time` - Production monotonic clock

pub mod cache;
pub mod config;
pub mod signal;
pub mod storage;
pub mod time;

pub use cache::{PeerCache, PEERS_CACHE_NAMESPACE};
pub use config::PeerPoolConfig;
pub use signal::{CallbackSignalSink, NoOpSignalSink, PeerSummary, SignalEnvelope};
pub use storage::InMemoryKVStore;
#[cfg(feature = "rocksdb")]
pub use storage::{RocksDbConfig, RocksDbStore};
pub use time::MonotonicTimeSource;
