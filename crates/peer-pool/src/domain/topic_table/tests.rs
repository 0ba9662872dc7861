//! Tests for per-topic admission and eviction

use super::*;
use crate::domain::{Endpoint, NodeId, NodeRecord, Timestamp};
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr};

fn make_node_id(byte: u8) -> NodeId {
    let mut id = [0u8; 32];
    id[0] = byte;
    NodeId::new(id)
}

fn make_node(byte: u8) -> NodeRecord {
    NodeRecord::new(
        make_node_id(byte),
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, byte)), 30303, 30303),
    )
}

fn at(millis: u64) -> Timestamp {
    Timestamp::from_millis(millis)
}

/// Discover and connect a node, asserting it was admitted.
fn connect(table: &mut TopicTable, byte: u8, now: u64) {
    assert_eq!(
        table.process_found(make_node(byte), at(now)),
        FoundOutcome::Dial(make_node(byte))
    );
    assert!(matches!(
        table.confirm_added(&make_node_id(byte)),
        AddedOutcome::Admitted { .. }
    ));
}

// =============================================================================
// TEST GROUP 1: Discovery
// =============================================================================

#[test]
fn test_found_node_is_dialed_while_capacity_remains() {
    let mut table = TopicTable::new(Limits::new(1, 2));

    assert_eq!(
        table.process_found(make_node(1), at(1)),
        FoundOutcome::Dial(make_node(1))
    );
    assert!(table.is_candidate(&make_node_id(1)));
    // Dial in flight: not offered for backfill
    assert!(!table.is_queued(&make_node_id(1)));
}

#[test]
fn test_found_node_is_queued_when_full() {
    let mut table = TopicTable::new(Limits::new(1, 2));
    connect(&mut table, 1, 1);
    connect(&mut table, 2, 2);

    assert_eq!(table.process_found(make_node(3), at(3)), FoundOutcome::Queued);
    assert!(table.is_queued(&make_node_id(3)));
    assert!(!table.is_connected(&make_node_id(3)));
    assert_eq!(table.connected_count(), 2);
}

#[test]
fn test_rediscovery_refreshes_connected_peer() {
    let mut table = TopicTable::new(Limits::new(1, 2));
    connect(&mut table, 1, 1);

    assert_eq!(table.process_found(make_node(1), at(50)), FoundOutcome::Refreshed);
    assert_eq!(
        table.get(&make_node_id(1)).map(|r| r.discovered_at),
        Some(at(50))
    );
    assert_eq!(table.stats().candidates, 0);
}

#[test]
fn test_rediscovery_refreshes_candidate() {
    let mut table = TopicTable::new(Limits::new(0, 0));

    table.process_found(make_node(1), at(1));
    table.process_found(make_node(1), at(9));

    let stats = table.stats();
    assert_eq!(stats.candidates, 1);
    assert_eq!(stats.queued, 1);
    assert_eq!(
        table.get(&make_node_id(1)).map(|r| r.discovered_at),
        Some(at(9))
    );
}

// =============================================================================
// TEST GROUP 2: Admission
// =============================================================================

#[test]
fn test_confirm_added_unknown_is_ignored() {
    let mut table = TopicTable::new(Limits::new(1, 2));
    assert_eq!(table.confirm_added(&make_node_id(9)), AddedOutcome::Unknown);
    assert_eq!(table.connected_count(), 0);
}

#[test]
fn test_confirm_added_relocates_record() {
    let mut table = TopicTable::new(Limits::new(1, 2));
    table.process_found(make_node(1), at(1));

    let outcome = table.confirm_added(&make_node_id(1));
    assert_eq!(
        outcome,
        AddedOutcome::Admitted {
            node: make_node(1),
            reached_min: true,
        }
    );
    assert!(table.is_connected(&make_node_id(1)));
    assert!(!table.is_candidate(&make_node_id(1)));
    assert!(table.get(&make_node_id(1)).map(|r| r.connected).unwrap_or(false));

    assert_eq!(
        table.confirm_added(&make_node_id(1)),
        AddedOutcome::AlreadyConnected
    );
}

#[test]
fn test_reached_min_only_on_crossing() {
    let mut table = TopicTable::new(Limits::new(1, 3));
    table.process_found(make_node(1), at(1));
    table.process_found(make_node(2), at(2));

    assert!(matches!(
        table.confirm_added(&make_node_id(1)),
        AddedOutcome::Admitted { reached_min: true, .. }
    ));
    assert!(matches!(
        table.confirm_added(&make_node_id(2)),
        AddedOutcome::Admitted { reached_min: false, .. }
    ));
}

#[test]
fn test_overshoot_is_dismissed() {
    // Limits (1, 1): A connects, then B connects while full.
    let mut table = TopicTable::new(Limits::new(1, 1));
    table.process_found(make_node(1), at(1));
    table.process_found(make_node(2), at(2));
    assert!(matches!(
        table.confirm_added(&make_node_id(1)),
        AddedOutcome::Admitted { .. }
    ));

    assert_eq!(
        table.confirm_added(&make_node_id(2)),
        AddedOutcome::Dismissed { node: make_node(2) }
    );
    assert_eq!(table.connected_count(), 1);
    assert!(table.is_dismissed(&make_node_id(2)));
    assert!(!table.is_queued(&make_node_id(2)));
}

#[test]
fn test_dismissed_candidate_is_not_redialed() {
    let mut table = TopicTable::new(Limits::new(1, 1));
    table.process_found(make_node(1), at(1));
    table.process_found(make_node(2), at(2));
    table.confirm_added(&make_node_id(1));
    table.confirm_added(&make_node_id(2));

    assert_eq!(
        table.process_found(make_node(2), at(3)),
        FoundOutcome::PendingDismissal
    );
    assert!(table.take_backfill(at(4), Duration::from_secs(60)).chosen.is_none());
}

// =============================================================================
// TEST GROUP 3: Drops
// =============================================================================

#[test]
fn test_dismissed_drop_is_not_a_shortfall() {
    let mut table = TopicTable::new(Limits::new(1, 1));
    table.process_found(make_node(1), at(1));
    table.process_found(make_node(2), at(2));
    table.confirm_added(&make_node_id(1));
    table.confirm_added(&make_node_id(2));

    let outcome = table.confirm_dropped(&make_node_id(2));
    assert_eq!(outcome, DroppedOutcome::DismissalCompleted);
    assert!(!outcome.is_confirmed());

    assert!(table.is_connected(&make_node_id(1)));
    assert!(!table.is_dismissed(&make_node_id(2)));
    // Kept as a candidate for later backfill
    assert!(table.is_queued(&make_node_id(2)));
}

#[test]
fn test_drop_of_connected_peer() {
    let mut table = TopicTable::new(Limits::new(1, 2));
    connect(&mut table, 1, 1);
    connect(&mut table, 2, 2);

    let outcome = table.confirm_dropped(&make_node_id(2));
    assert_eq!(
        outcome,
        DroppedOutcome::Removed {
            node: make_node(2),
            fell_below_min: false,
        }
    );
    assert!(outcome.is_confirmed());
    assert!(table.get(&make_node_id(2)).is_none());

    assert!(matches!(
        table.confirm_dropped(&make_node_id(1)),
        DroppedOutcome::Removed { fell_below_min: true, .. }
    ));
    assert!(table.below_min());
}

#[test]
fn test_drop_unknown_is_ignored() {
    let mut table = TopicTable::new(Limits::new(1, 2));
    assert_eq!(table.confirm_dropped(&make_node_id(1)), DroppedOutcome::Unknown);

    // A candidate that never connected is not a drop either
    table.process_found(make_node(2), at(1));
    assert_eq!(table.confirm_dropped(&make_node_id(2)), DroppedOutcome::Unknown);
    assert!(table.is_queued(&make_node_id(2)));
}

#[test]
fn test_failed_dial_is_offered_for_backfill() {
    let mut table = TopicTable::new(Limits::new(1, 1));
    // Both dialed while nothing is connected yet
    table.process_found(make_node(1), at(10));
    table.process_found(make_node(2), at(20));
    table.confirm_added(&make_node_id(1));

    // Dial of 2 failed
    assert_eq!(table.confirm_dropped(&make_node_id(2)), DroppedOutcome::Unknown);
    assert!(table.confirm_dropped(&make_node_id(1)).is_confirmed());

    let backfill = table.take_backfill(at(30), Duration::from_secs(60));
    assert_eq!(backfill.chosen.map(|r| r.id()), Some(make_node_id(2)));
}

// =============================================================================
// TEST GROUP 4: Backfill
// =============================================================================

#[test]
fn test_backfill_picks_most_recent_candidate() {
    let mut table = TopicTable::new(Limits::new(1, 1));
    connect(&mut table, 1, 1);
    table.process_found(make_node(2), at(10));
    table.process_found(make_node(3), at(30));
    table.process_found(make_node(4), at(20));

    table.confirm_dropped(&make_node_id(1));
    let backfill = table.take_backfill(at(40), Duration::from_secs(60));

    assert_eq!(backfill.chosen.map(|r| r.id()), Some(make_node_id(3)));
    assert_eq!(backfill.expired, 0);
    // Picked but still tracked until it connects
    assert!(table.is_candidate(&make_node_id(3)));
    assert!(!table.is_queued(&make_node_id(3)));
}

#[test]
fn test_backfill_skips_and_prunes_expired() {
    let mut table = TopicTable::new(Limits::new(0, 0));
    table.process_found(make_node(1), at(100));
    table.process_found(make_node(2), at(900));

    // Window 500 ms at t=1000: node 2 is fresh, node 1 is stale
    let backfill = table.take_backfill(at(1_000), Duration::from_millis(500));
    assert_eq!(backfill.chosen.map(|r| r.id()), Some(make_node_id(2)));
    assert_eq!(backfill.expired, 1);
    assert!(!table.is_candidate(&make_node_id(1)));

    let backfill = table.take_backfill(at(1_000), Duration::from_millis(500));
    assert!(backfill.chosen.is_none());
    assert_eq!(backfill.expired, 0);
}

#[test]
fn test_backfill_prunes_stale_dials() {
    let mut table = TopicTable::new(Limits::new(5, 5));
    for byte in 1..=3 {
        table.process_found(make_node(byte), at(0));
    }
    assert_eq!(table.stats().queued, 0);

    let backfill = table.take_backfill(at(2_000), Duration::from_secs(1));
    assert!(backfill.chosen.is_none());
    assert_eq!(backfill.expired, 3);
    assert_eq!(table.stats().candidates, 0);
}

#[test]
fn test_backfill_empty_table() {
    let mut table = TopicTable::new(Limits::new(1, 2));
    assert_eq!(
        table.take_backfill(at(0), Duration::from_secs(1)),
        Backfill {
            chosen: None,
            expired: 0,
        }
    );
}

// =============================================================================
// TEST GROUP 5: Limits
// =============================================================================

#[test]
fn test_predicates_follow_limits() {
    let mut table = TopicTable::new(Limits::new(1, 2));
    assert!(table.below_min());
    assert!(!table.max_reached());

    connect(&mut table, 1, 1);
    assert!(!table.below_min());
    assert!(!table.max_reached());

    connect(&mut table, 2, 2);
    assert!(table.max_reached());

    table.set_limits(Limits::new(1, 3));
    assert!(!table.max_reached());
    assert_eq!(table.limits(), Limits::new(1, 3));
}

// =============================================================================
// TEST GROUP 6: Invariants
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Found(u8),
    Added(u8),
    Dropped(u8),
    Backfill,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8).prop_map(Op::Found),
        (0u8..8).prop_map(Op::Added),
        (0u8..8).prop_map(Op::Dropped),
        Just(Op::Backfill),
    ]
}

proptest! {
    #[test]
    fn prop_capacity_and_no_duplication(
        min in 0usize..3,
        extra in 0usize..3,
        ops in proptest::collection::vec(op_strategy(), 0..64),
    ) {
        let limits = Limits::new(min, min + extra);
        let mut table = TopicTable::new(limits);

        for (step, op) in ops.into_iter().enumerate() {
            let now = at(step as u64);
            match op {
                Op::Found(byte) => {
                    table.process_found(make_node(byte), now);
                }
                Op::Added(byte) => {
                    table.confirm_added(&make_node_id(byte));
                }
                Op::Dropped(byte) => {
                    table.confirm_dropped(&make_node_id(byte));
                }
                Op::Backfill => {
                    table.take_backfill(now, Duration::from_secs(60));
                }
            }

            prop_assert!(table.connected_count() <= limits.max);
            for byte in 0u8..8 {
                let id = make_node_id(byte);
                prop_assert!(!(table.is_connected(&id) && table.is_candidate(&id)));
                if table.is_dismissed(&id) {
                    prop_assert!(!table.is_queued(&id));
                }
            }
        }
    }
}
