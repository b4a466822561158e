//! Assertion helpers for sync scenarios.
//!
//! These are pure functions that verify calendar state after a scenario
//! completes. They take state as input and return pass/fail.

use std::collections::{BTreeMap, HashSet};

use pairsync_types::{EntryId, Event, EventId, SessionOutcome, SyncLogEntry};

/// Peer state for assertion checking.
#[derive(Debug, Clone, Default)]
pub struct PeerState {
    /// Peer name
    pub peer_id: String,
    /// Events in this peer's repository
    pub events: BTreeMap<EventId, Event>,
    /// History entries in this peer's repository
    pub history: HashSet<EntryId>,
}

/// Topology state for assertion checking.
#[derive(Debug, Clone, Default)]
pub struct TopologyState {
    /// All peers in the topology
    pub peers: Vec<PeerState>,
    /// Every event created on any peer
    pub all_created_events: HashSet<EventId>,
    /// Every history entry recorded on any peer
    pub all_history_entries: HashSet<EntryId>,
}

/// Result of an assertion check.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    /// Whether the assertion passed
    pub passed: bool,
    /// Description of what was checked
    pub description: String,
    /// Details on failure
    pub failure_details: Option<String>,
}

impl AssertionResult {
    /// Create a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.into(),
            failure_details: None,
        }
    }

    /// Create a failing result.
    pub fn fail(description: &str, details: &str) -> Self {
        Self {
            passed: false,
            description: description.into(),
            failure_details: Some(details.into()),
        }
    }
}

/// Assert that a specific event is present on a peer.
pub fn assert_event_present(peer: &PeerState, event: EventId) -> AssertionResult {
    if peer.events.contains_key(&event) {
        AssertionResult::pass(&format!("Event {} present on {}", event, peer.peer_id))
    } else {
        AssertionResult::fail(
            &format!("Event {} should be present on {}", event, peer.peer_id),
            &format!("Peer has {} events but not the expected one", peer.events.len()),
        )
    }
}

/// Assert that no data was lost across the topology.
///
/// Every event created on any peer should be present on every peer once
/// the syncs have settled.
pub fn assert_no_data_loss(topology: &TopologyState) -> AssertionResult {
    let expected = &topology.all_created_events;

    for peer in &topology.peers {
        for event in expected {
            if !peer.events.contains_key(event) {
                return AssertionResult::fail(
                    "No data loss check",
                    &format!(
                        "Peer {} is missing event {}. Has {}/{} events.",
                        peer.peer_id,
                        event,
                        peer.events.len(),
                        expected.len()
                    ),
                );
            }
        }
    }

    AssertionResult::pass(&format!(
        "All {} peers have all {} events",
        topology.peers.len(),
        expected.len()
    ))
}

/// Assert that every history entry reached every peer.
pub fn assert_history_complete(topology: &TopologyState) -> AssertionResult {
    let expected = &topology.all_history_entries;

    for peer in &topology.peers {
        let missing = expected.difference(&peer.history).count();
        if missing > 0 {
            return AssertionResult::fail(
                "History completeness",
                &format!(
                    "Peer {} is missing {} of {} history entries",
                    peer.peer_id,
                    missing,
                    expected.len()
                ),
            );
        }
    }

    AssertionResult::pass(&format!(
        "All {} peers hold all {} history entries",
        topology.peers.len(),
        expected.len()
    ))
}

/// Assert that all peers hold field-for-field identical events.
pub fn assert_converged(topology: &TopologyState) -> AssertionResult {
    let Some(reference) = topology.peers.first() else {
        return AssertionResult::pass("No peers to check");
    };

    for peer in topology.peers.iter().skip(1) {
        if peer.events.len() != reference.events.len() {
            return AssertionResult::fail(
                "Event convergence",
                &format!(
                    "Peer {} has {} events, {} has {}",
                    peer.peer_id,
                    peer.events.len(),
                    reference.peer_id,
                    reference.events.len()
                ),
            );
        }
        for (id, event) in &peer.events {
            if reference.events.get(id) != Some(event) {
                return AssertionResult::fail(
                    "Event convergence",
                    &format!(
                        "Event {} differs between {} and {}: {:?} vs {:?}",
                        id,
                        reference.peer_id,
                        peer.peer_id,
                        reference.events.get(id),
                        event
                    ),
                );
            }
        }
    }

    AssertionResult::pass(&format!(
        "All {} peers hold the same {} events",
        topology.peers.len(),
        reference.events.len()
    ))
}

/// Assert that a session left exactly one log entry with the given outcome.
pub fn assert_single_log(logs: &[SyncLogEntry], outcome: SessionOutcome) -> AssertionResult {
    match logs {
        [entry] if entry.outcome == outcome => {
            AssertionResult::pass(&format!("One {:?} log entry", outcome))
        }
        [entry] => AssertionResult::fail(
            "Single session log",
            &format!(
                "Expected outcome {:?}, got {:?}: {}",
                outcome, entry.outcome, entry.details
            ),
        ),
        _ => AssertionResult::fail(
            "Single session log",
            &format!("Expected 1 log entry, found {}", logs.len()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsync_types::{DeviceId, PeerId, ResolutionMethod, Timestamp};
    use uuid::Uuid;

    fn id(n: u128) -> EventId {
        EventId::from_uuid(Uuid::from_u128(n))
    }

    fn entry(n: u128) -> EntryId {
        EntryId::from_uuid(Uuid::from_u128(n))
    }

    fn make_event(n: u128, title: &str) -> Event {
        Event {
            id: id(n),
            month: 1,
            title: title.into(),
            location: None,
            day: 1,
            created_at: Timestamp::from_millis(1),
            last_modified_at: Timestamp::from_millis(1),
            last_modified_by: DeviceId::new("a"),
            color: "red".into(),
        }
    }

    fn make_peer(name: &str, events: &[Event], history: &[u128]) -> PeerState {
        PeerState {
            peer_id: name.into(),
            events: events.iter().map(|e| (e.id, e.clone())).collect(),
            history: history.iter().map(|n| entry(*n)).collect(),
        }
    }

    fn make_log(outcome: SessionOutcome) -> SyncLogEntry {
        SyncLogEntry {
            id: Uuid::from_u128(9),
            timestamp: Timestamp::from_millis(5),
            peer_identifier: PeerId::new("radio:b"),
            peer_name: None,
            events_received: 0,
            events_sent: 0,
            history_received: 0,
            history_sent: 0,
            conflict_count: 0,
            resolution_method: ResolutionMethod::Unchanged,
            outcome,
            details: "test".into(),
        }
    }

    #[test]
    fn test_event_present_pass() {
        let peer = make_peer("A", &[make_event(1, "Yoga")], &[]);
        assert!(assert_event_present(&peer, id(1)).passed);
    }

    #[test]
    fn test_event_present_fail() {
        let peer = make_peer("A", &[make_event(1, "Yoga")], &[]);
        let result = assert_event_present(&peer, id(2));
        assert!(!result.passed);
        assert!(result.failure_details.is_some());
    }

    #[test]
    fn test_no_data_loss_pass() {
        let events = [make_event(1, "Yoga"), make_event(2, "Gym")];
        let topology = TopologyState {
            peers: vec![make_peer("A", &events, &[]), make_peer("B", &events, &[])],
            all_created_events: [id(1), id(2)].into_iter().collect(),
            all_history_entries: HashSet::new(),
        };
        assert!(assert_no_data_loss(&topology).passed);
    }

    #[test]
    fn test_no_data_loss_fail() {
        let topology = TopologyState {
            peers: vec![
                make_peer("A", &[make_event(1, "Yoga"), make_event(2, "Gym")], &[]),
                make_peer("B", &[make_event(1, "Yoga")], &[]), // Missing 2
            ],
            all_created_events: [id(1), id(2)].into_iter().collect(),
            all_history_entries: HashSet::new(),
        };

        let result = assert_no_data_loss(&topology);
        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("Peer B is missing"));
    }

    #[test]
    fn test_history_complete() {
        let mut topology = TopologyState {
            peers: vec![make_peer("A", &[], &[1, 2]), make_peer("B", &[], &[1, 2])],
            all_created_events: HashSet::new(),
            all_history_entries: [entry(1), entry(2)].into_iter().collect(),
        };
        assert!(assert_history_complete(&topology).passed);

        topology.peers[1].history.remove(&entry(2));
        let result = assert_history_complete(&topology);
        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("missing 1 of 2"));
    }

    #[test]
    fn test_converged_pass() {
        let events = [make_event(1, "Yoga")];
        let topology = TopologyState {
            peers: vec![make_peer("A", &events, &[]), make_peer("B", &events, &[])],
            ..Default::default()
        };
        assert!(assert_converged(&topology).passed);
    }

    #[test]
    fn test_converged_fail_on_field() {
        let topology = TopologyState {
            peers: vec![
                make_peer("A", &[make_event(1, "Yoga")], &[]),
                make_peer("B", &[make_event(1, "Pilates")], &[]),
            ],
            ..Default::default()
        };

        let result = assert_converged(&topology);
        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("Pilates"));
    }

    #[test]
    fn test_converged_empty() {
        assert!(assert_converged(&TopologyState::default()).passed);
    }

    #[test]
    fn test_single_log() {
        let completed = [make_log(SessionOutcome::Completed)];
        assert!(assert_single_log(&completed, SessionOutcome::Completed).passed);
        assert!(!assert_single_log(&completed, SessionOutcome::Failed).passed);

        let twice = [
            make_log(SessionOutcome::Failed),
            make_log(SessionOutcome::Completed),
        ];
        let result = assert_single_log(&twice, SessionOutcome::Completed);
        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("found 2"));
    }
}
