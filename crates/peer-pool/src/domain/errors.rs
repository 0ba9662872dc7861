//! Domain Errors for the Peer Pool
//!
//! Only capability failures reach callers of `start`. Cache and store
//! faults are returned by the adapters and absorbed by the pools.

use thiserror::Error;

use crate::domain::Topic;

/// Errors surfaced by `PeerPool`, `TopicPool` and `Register`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerPoolError {
    /// The discovery subsystem is not running.
    #[error("Discovery is not running")]
    DiscoveryUnavailable,

    /// The discovery subsystem refused to (re)start.
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Errors reported by the discovery subsystem.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Discovery has been shut down.
    #[error("Discovery is stopped")]
    Stopped,

    /// Starting the discovery subsystem failed.
    #[error("Failed to start discovery: {0}")]
    StartFailed(String),

    /// Stopping the discovery subsystem failed.
    #[error("Failed to stop discovery: {0}")]
    StopFailed(String),

    /// A topic search or registration failed.
    #[error("Topic {topic} query failed: {message}")]
    QueryFailed {
        /// Topic being searched or advertised.
        topic: Topic,
        /// Reason.
        message: String,
    },
}

/// Errors from the persistent key-value store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError {
        /// Reason.
        message: String,
    },
    /// Data corruption in the store.
    #[error("KV store corruption: {message}")]
    CorruptionError {
        /// Reason.
        message: String,
    },
}

/// Errors from the peer cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying store failed.
    #[error(transparent)]
    Store(#[from] KVStoreError),

    /// A record could not be encoded or decoded.
    #[error("Peer record codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Topic name does not fit the key layout.
    #[error("Topic name too long: {len} bytes")]
    TopicTooLong {
        /// Length of the rejected topic name.
        len: usize,
    },
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Limits for a topic are inconsistent.
    #[error("Invalid limits for topic {topic}: min {min} > max {max}")]
    InvalidLimits {
        /// Offending topic.
        topic: Topic,
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A polling period was zero.
    #[error("Sync period `{0}` must be greater than zero")]
    ZeroPeriod(&'static str),
}
