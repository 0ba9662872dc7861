//! Topic table decision types.
//!
//! The table never performs I/O. Each mutation returns one of these and the
//! caller carries it out once the lock is released.

use crate::domain::{NodeRecord, PeerRecord};

/// Result of processing a discovered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoundOutcome {
    /// Node is already connected; only its discovery time was refreshed.
    Refreshed,
    /// Spare capacity: ask the connection manager to dial this node.
    Dial(NodeRecord),
    /// Topic is full: node kept as a ranked candidate.
    Queued,
    /// Node is being dismissed; refreshed but not dialed.
    PendingDismissal,
}

/// Result of a connect confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddedOutcome {
    /// The id is not tracked by this topic.
    Unknown,
    /// The id is already in the connected set.
    AlreadyConnected,
    /// Moved from candidates to connected.
    Admitted {
        /// Admitted node.
        node: NodeRecord,
        /// Connected count crossed `min` from below.
        reached_min: bool,
    },
    /// Topic was full: the peer is marked dismissed and must be dropped.
    Dismissed {
        /// Node to drop.
        node: NodeRecord,
    },
}

/// Result of a drop confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DroppedOutcome {
    /// The id is not tracked by this topic.
    Unknown,
    /// A drop we requested completed; the peer is a candidate again.
    DismissalCompleted,
    /// A connected peer went away.
    Removed {
        /// Dropped node.
        node: NodeRecord,
        /// Connected count crossed below `min`.
        fell_below_min: bool,
    },
}

impl DroppedOutcome {
    /// Whether this was a genuine loss of a connected peer.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, DroppedOutcome::Removed { .. })
    }
}

/// Result of picking a backfill candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backfill {
    /// Chosen candidate, if any was eligible.
    pub chosen: Option<PeerRecord>,
    /// Expired candidates pruned while searching.
    pub expired: usize,
}

/// Snapshot of one topic's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopicStats {
    /// Connected peers.
    pub connected: usize,
    /// Candidates held (ranked or with a dial in flight).
    pub candidates: usize,
    /// Candidates ranked for backfill.
    pub queued: usize,
}
