//! Value Objects for the Peer Pool

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Polling period used while a topic is under-subscribed.
pub const DEFAULT_FAST_SYNC: Duration = Duration::from_secs(3);

/// Polling period used once a topic has enough peers.
pub const DEFAULT_SLOW_SYNC: Duration = Duration::from_secs(30);

/// How long fast mode may persist before it downgrades itself to slow mode.
pub const DEFAULT_TOPIC_FAST_MODE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long discovery may run before the pool shuts it down (stop-on-max only).
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Candidates not rediscovered within this window are no longer dialed.
pub const DEFAULT_EXPIRATION_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Number of cached peers used to seed a topic when its search starts.
pub const DEFAULT_CACHE_PREFETCH: usize = 5;

/// Delay before retrying a failed discovery restart.
pub const DISCOVERY_RESTART_RETRY: Duration = Duration::from_secs(2);

/// Buffer of the found-records queue between discovery and the consumer.
pub const FOUND_QUEUE_CAPACITY: usize = 5;

/// Buffer of the lookup-signal queue.
pub const LOOKUP_QUEUE_CAPACITY: usize = 10;

/// Buffer of the sync period queue.
pub const PERIOD_QUEUE_CAPACITY: usize = 2;

/// Connected-peer bounds for one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Limits {
    /// Below this, the topic is under-subscribed and polls fast.
    pub min: usize,
    /// Never keep more than this many connected peers.
    pub max: usize,
}

impl Limits {
    /// Create limits. Does not validate; see [`Limits::is_valid`].
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// `min` must not exceed `max`.
    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Polling-rate state of a topic search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Under-subscribed: poll aggressively.
    Fast,
    /// Satisfied (or fast mode timed out): poll rarely.
    Slow,
}

impl SyncMode {
    /// Mode requested for a given connected count.
    pub fn for_peer_count(connected: usize, limits: Limits) -> Self {
        if connected < limits.min {
            SyncMode::Fast
        } else {
            SyncMode::Slow
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Slow => write!(f, "slow"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_validity() {
        assert!(Limits::new(1, 2).is_valid());
        assert!(Limits::new(0, 0).is_valid());
        assert!(!Limits::new(3, 2).is_valid());
    }

    #[test]
    fn test_sync_mode_for_peer_count() {
        let limits = Limits::new(2, 4);
        assert_eq!(SyncMode::for_peer_count(0, limits), SyncMode::Fast);
        assert_eq!(SyncMode::for_peer_count(1, limits), SyncMode::Fast);
        assert_eq!(SyncMode::for_peer_count(2, limits), SyncMode::Slow);
        assert_eq!(SyncMode::for_peer_count(4, limits), SyncMode::Slow);
    }
}
