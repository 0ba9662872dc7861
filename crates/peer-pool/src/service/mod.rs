//! # Service Layer
//!
//! Long-running coordination on top of the domain bookkeeping:
//!
//! - `sync_strategy` - Polling-rate controller of a topic search
//! - `topic_pool` - Discovery and connection pool of one topic
//! - `peer_pool` - Topic pools plus connect/drop event routing
//! - `register` - Advertisement of this node's topics

pub mod peer_pool;
pub mod register;
pub mod sync_strategy;
pub mod topic_pool;

pub use peer_pool::PeerPool;
pub use register::Register;
pub use sync_strategy::{SyncPeriods, SyncStrategy, SyncUpdater};
pub use topic_pool::TopicPool;

use std::future::pending;
use std::pin::Pin;
use tokio::time::Sleep;

/// Resolves when an armed timer fires; never resolves while disarmed.
pub(crate) async fn expired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
