//! # Topic Table
//!
//! Connected and candidate peers of a single topic, with the admission
//! and eviction policy applied to them.
//!
//! ## Invariants
//!
//! - `connected.len() <= limits.max`: a connect confirmation beyond capacity
//!   dismisses the peer instead of admitting it.
//! - An id is never both connected and a candidate: admission relocates the
//!   record, it does not copy it.
//! - A dismissed record is never ranked, so it is never picked for backfill
//!   while its drop is pending.

mod types;

pub use types::{AddedOutcome, Backfill, DroppedOutcome, FoundOutcome, TopicStats};

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{CandidateQueue, Limits, NodeId, NodeRecord, PeerRecord, Timestamp};

/// Per-topic peer bookkeeping.
#[derive(Debug)]
pub struct TopicTable {
    limits: Limits,
    connected: HashMap<NodeId, PeerRecord>,
    candidates: CandidateQueue,
}

impl TopicTable {
    /// Create an empty table.
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            connected: HashMap::new(),
            candidates: CandidateQueue::new(),
        }
    }

    /// Current limits.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Replace the limits. Already-connected peers above a lowered max are
    /// kept until they drop.
    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    /// Number of connected peers.
    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    /// Connected count has reached `max`.
    pub fn max_reached(&self) -> bool {
        self.connected.len() >= self.limits.max
    }

    /// Connected count is below `min`.
    pub fn below_min(&self) -> bool {
        self.connected.len() < self.limits.min
    }

    /// Whether the id is connected for this topic.
    pub fn is_connected(&self, id: &NodeId) -> bool {
        self.connected.contains_key(id)
    }

    /// Whether the id is held as a candidate.
    pub fn is_candidate(&self, id: &NodeId) -> bool {
        self.candidates.contains(id)
    }

    /// Whether the id is a candidate ranked for backfill.
    pub fn is_queued(&self, id: &NodeId) -> bool {
        self.candidates.is_queued(id)
    }

    /// Whether the id is being dismissed.
    pub fn is_dismissed(&self, id: &NodeId) -> bool {
        self.candidates
            .get(id)
            .map(|record| record.dismissed)
            .unwrap_or(false)
    }

    /// Look up a record, connected or candidate.
    pub fn get(&self, id: &NodeId) -> Option<&PeerRecord> {
        self.connected.get(id).or_else(|| self.candidates.get(id))
    }

    /// Bookkeeping snapshot.
    pub fn stats(&self) -> TopicStats {
        TopicStats {
            connected: self.connected.len(),
            candidates: self.candidates.len(),
            queued: self.candidates.queued_len(),
        }
    }

    /// Record a discovery of `node` at `now`.
    ///
    /// Every rediscovery refreshes `discovered_at`. A dial is requested only
    /// when the topic has spare capacity; otherwise the node is ranked for
    /// later backfill.
    pub fn process_found(&mut self, node: NodeRecord, now: Timestamp) -> FoundOutcome {
        let id = node.id;

        if let Some(record) = self.connected.get_mut(&id) {
            record.discovered_at = now;
            return FoundOutcome::Refreshed;
        }

        if self.candidates.contains(&id) {
            self.candidates.refresh(&id, now);
            if self.is_dismissed(&id) {
                return FoundOutcome::PendingDismissal;
            }
        } else {
            self.candidates.insert(PeerRecord::new(node, now));
        }

        if self.connected.len() < self.limits.max {
            // Dial in flight: unranked so backfill skips it.
            self.candidates.dequeue(&id);
            FoundOutcome::Dial(node)
        } else {
            self.candidates.enqueue(&id);
            FoundOutcome::Queued
        }
    }

    /// Apply a connect confirmation.
    ///
    /// Several dials may be in flight at once. A confirmation arriving at
    /// capacity dismisses the peer.
    pub fn confirm_added(&mut self, id: &NodeId) -> AddedOutcome {
        if self.connected.contains_key(id) {
            return AddedOutcome::AlreadyConnected;
        }
        let Some(node) = self.candidates.get(id).map(|record| record.node) else {
            return AddedOutcome::Unknown;
        };

        if self.connected.len() >= self.limits.max {
            self.candidates.set_dismissed(id, true);
            return AddedOutcome::Dismissed { node };
        }

        let Some(mut record) = self.candidates.remove(id) else {
            return AddedOutcome::Unknown;
        };
        let before = self.connected.len();
        record.connected = true;
        record.dismissed = false;
        self.connected.insert(*id, record);

        AddedOutcome::Admitted {
            node,
            reached_min: before < self.limits.min && self.connected.len() >= self.limits.min,
        }
    }

    /// Apply a drop confirmation.
    pub fn confirm_dropped(&mut self, id: &NodeId) -> DroppedOutcome {
        if self.is_dismissed(id) {
            // Dismissed peers return to the ranking.
            self.candidates.set_dismissed(id, false);
            self.candidates.enqueue(id);
            return DroppedOutcome::DismissalCompleted;
        }

        let before = self.connected.len();
        let Some(record) = self.connected.remove(id) else {
            // A dial that never connected: offer the candidate for backfill again.
            if self.candidates.contains(id) {
                self.candidates.enqueue(id);
            }
            return DroppedOutcome::Unknown;
        };

        DroppedOutcome::Removed {
            node: record.node,
            fell_below_min: before >= self.limits.min && self.connected.len() < self.limits.min,
        }
    }

    /// Pick the most recently discovered, unexpired candidate for dialing.
    ///
    /// Expired candidates are removed first, ranked or not, unless their
    /// dismissal is still pending. The chosen record leaves the ranking but
    /// stays in the table so its connect confirmation is recognised.
    pub fn take_backfill(&mut self, now: Timestamp, expiration: Duration) -> Backfill {
        let expired = self.candidates.prune_expired(now, expiration);
        Backfill {
            chosen: self.candidates.pop_best(),
            expired,
        }
    }
}

#[cfg(test)]
mod tests;
