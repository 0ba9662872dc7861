//! # Candidate Queue
//!
//! Discovered-but-not-connected peers of one topic.
//!
//! Records live in an arena keyed by `NodeId`. A separate ordered index of
//! `(discovered_at, sequence, id)` ranks the ones that may be dialed next;
//! the greatest key is the most recently discovered peer. A record can sit
//! in the arena without being ranked: a dial was already requested for it,
//! or we are dismissing it.
//!
//! Ties on `discovered_at` are broken by insertion sequence, later wins.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::domain::{NodeId, PeerRecord, Timestamp};

/// Ordering key in the ranking index.
type RankKey = (Timestamp, u64, NodeId);

#[derive(Debug)]
struct Entry {
    record: PeerRecord,
    rank: Option<RankKey>,
}

/// Arena of candidate records plus a ranking index.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    entries: HashMap<NodeId, Entry>,
    index: BTreeSet<RankKey>,
    next_seq: u64,
}

impl CandidateQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in the arena (ranked or not).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no records are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of ranked records.
    pub fn queued_len(&self) -> usize {
        self.index.len()
    }

    /// Whether the id is held.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether the id is currently ranked.
    pub fn is_queued(&self, id: &NodeId) -> bool {
        self.entries
            .get(id)
            .map(|entry| entry.rank.is_some())
            .unwrap_or(false)
    }

    /// Borrow a record.
    pub fn get(&self, id: &NodeId) -> Option<&PeerRecord> {
        self.entries.get(id).map(|entry| &entry.record)
    }

    /// Insert an unranked record. Returns false if the id is already held.
    pub fn insert(&mut self, record: PeerRecord) -> bool {
        let id = record.id();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, Entry { record, rank: None });
        true
    }

    /// Rank a held record. No-op if already ranked or unknown.
    pub fn enqueue(&mut self, id: &NodeId) -> bool {
        let seq = self.next_seq;
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.rank.is_some() {
            return false;
        }
        let key = (entry.record.discovered_at, seq, *id);
        entry.rank = Some(key);
        self.index.insert(key);
        self.next_seq += 1;
        true
    }

    /// Remove a record from the ranking but keep it in the arena.
    pub fn dequeue(&mut self, id: &NodeId) {
        if let Some(entry) = self.entries.get_mut(id) {
            if let Some(key) = entry.rank.take() {
                self.index.remove(&key);
            }
        }
    }

    /// Update the discovery time of a held record, re-ranking it if ranked.
    pub fn refresh(&mut self, id: &NodeId, now: Timestamp) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.record.discovered_at = now;
        if let Some(old) = entry.rank.take() {
            self.index.remove(&old);
            let key = (now, self.next_seq, *id);
            self.next_seq += 1;
            entry.rank = Some(key);
            self.index.insert(key);
        }
        true
    }

    /// Set or clear the dismissed flag. Dismissed records are never ranked.
    pub fn set_dismissed(&mut self, id: &NodeId, dismissed: bool) {
        if dismissed {
            self.dequeue(id);
        }
        if let Some(entry) = self.entries.get_mut(id) {
            entry.record.dismissed = dismissed;
        }
    }

    /// The most recently discovered ranked record, without removing it.
    pub fn peek_best(&self) -> Option<&PeerRecord> {
        let (_, _, id) = self.index.last()?;
        self.get(id)
    }

    /// Unrank the most recently discovered record and return a copy of it.
    ///
    /// The record stays in the arena.
    pub fn pop_best(&mut self) -> Option<PeerRecord> {
        let key = self.index.pop_last()?;
        let entry = self.entries.get_mut(&key.2)?;
        entry.rank = None;
        Some(entry.record.clone())
    }

    /// Remove a record entirely.
    pub fn remove(&mut self, id: &NodeId) -> Option<PeerRecord> {
        let entry = self.entries.remove(id)?;
        if let Some(key) = entry.rank {
            self.index.remove(&key);
        }
        Some(entry.record)
    }

    /// Remove every expired record that is not being dismissed.
    ///
    /// Returns how many were removed.
    pub fn prune_expired(&mut self, now: Timestamp, window: Duration) -> usize {
        let expired: Vec<NodeId> = self
            .entries
            .values()
            .filter(|entry| !entry.record.dismissed && entry.record.is_expired(now, window))
            .map(|entry| entry.record.id())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }

    /// Iterate over every held record.
    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.entries.values().map(|entry| &entry.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Endpoint, NodeRecord};
    use std::net::{IpAddr, Ipv4Addr};

    fn make_record(byte: u8, at: u64) -> PeerRecord {
        PeerRecord::new(
            NodeRecord::new(
                NodeId::new([byte; 32]),
                Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, byte)), 30303, 30303),
            ),
            Timestamp::from_millis(at),
        )
    }

    fn id(byte: u8) -> NodeId {
        NodeId::new([byte; 32])
    }

    #[test]
    fn test_insert_is_unranked_until_enqueued() {
        let mut queue = CandidateQueue::new();
        assert!(queue.insert(make_record(1, 10)));
        assert!(!queue.insert(make_record(1, 20)), "duplicate ids are rejected");

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.queued_len(), 0);
        assert!(queue.peek_best().is_none());

        assert!(queue.enqueue(&id(1)));
        assert!(!queue.enqueue(&id(1)));
        assert_eq!(queue.queued_len(), 1);
    }

    #[test]
    fn test_pop_best_returns_most_recent() {
        let mut queue = CandidateQueue::new();
        for (byte, at) in [(1, 10), (2, 30), (3, 20)] {
            queue.insert(make_record(byte, at));
            queue.enqueue(&id(byte));
        }

        assert_eq!(queue.peek_best().map(PeerRecord::id), Some(id(2)));
        assert_eq!(queue.pop_best().map(|r| r.id()), Some(id(2)));
        assert_eq!(queue.pop_best().map(|r| r.id()), Some(id(3)));
        assert_eq!(queue.pop_best().map(|r| r.id()), Some(id(1)));
        assert!(queue.pop_best().is_none());

        // Popped records stay in the arena
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_ties_prefer_later_insertion() {
        let mut queue = CandidateQueue::new();
        queue.insert(make_record(9, 10));
        queue.enqueue(&id(9));
        queue.insert(make_record(1, 10));
        queue.enqueue(&id(1));

        assert_eq!(queue.pop_best().map(|r| r.id()), Some(id(1)));
    }

    #[test]
    fn test_refresh_reranks_queued_record() {
        let mut queue = CandidateQueue::new();
        queue.insert(make_record(1, 10));
        queue.enqueue(&id(1));
        queue.insert(make_record(2, 20));
        queue.enqueue(&id(2));

        assert!(queue.refresh(&id(1), Timestamp::from_millis(30)));
        assert_eq!(queue.queued_len(), 2);
        assert_eq!(queue.peek_best().map(PeerRecord::id), Some(id(1)));
    }

    #[test]
    fn test_refresh_keeps_unranked_record_unranked() {
        let mut queue = CandidateQueue::new();
        queue.insert(make_record(1, 10));

        assert!(queue.refresh(&id(1), Timestamp::from_millis(50)));
        assert!(!queue.is_queued(&id(1)));
        assert_eq!(
            queue.get(&id(1)).map(|r| r.discovered_at),
            Some(Timestamp::from_millis(50))
        );
    }

    #[test]
    fn test_dismissed_records_leave_ranking() {
        let mut queue = CandidateQueue::new();
        queue.insert(make_record(1, 10));
        queue.enqueue(&id(1));

        queue.set_dismissed(&id(1), true);
        assert!(!queue.is_queued(&id(1)));
        assert!(queue.get(&id(1)).map(|r| r.dismissed).unwrap_or(false));

        queue.set_dismissed(&id(1), false);
        assert!(!queue.get(&id(1)).map(|r| r.dismissed).unwrap_or(true));
    }

    #[test]
    fn test_prune_expired_covers_unranked_records() {
        let mut queue = CandidateQueue::new();
        queue.insert(make_record(1, 10));
        queue.insert(make_record(2, 10));
        queue.enqueue(&id(2));
        queue.insert(make_record(3, 10));
        queue.set_dismissed(&id(3), true);
        queue.insert(make_record(4, 900));

        let window = Duration::from_millis(500);
        assert_eq!(queue.prune_expired(Timestamp::from_millis(1_000), window), 2);

        assert!(!queue.contains(&id(1)));
        assert!(!queue.contains(&id(2)));
        // Pending dismissal survives until its drop arrives
        assert!(queue.contains(&id(3)));
        assert!(queue.contains(&id(4)));
        assert_eq!(queue.queued_len(), 0);
    }

    #[test]
    fn test_remove_clears_index() {
        let mut queue = CandidateQueue::new();
        queue.insert(make_record(1, 10));
        queue.enqueue(&id(1));

        assert!(queue.remove(&id(1)).is_some());
        assert!(queue.is_empty());
        assert_eq!(queue.queued_len(), 0);
        assert!(queue.remove(&id(1)).is_none());
    }
}
