//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! The pools own no I/O. Everything they talk to sits behind a driven port:
//! discovery, the connection manager, the persistent store, the clock and
//! the host's notification sink.

pub mod outbound;

pub use outbound::{
    ConnectionManager, Connector, Discovery, KeyValueStore, PeerEvent, Signal, SignalSink,
    TimeSource,
};
