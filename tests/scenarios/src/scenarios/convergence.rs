//! Convergence scenarios (C-CONV-*, C-CONF-*, C-INC-*).
//!
//! After a session both peers must hold identical events, every record
//! created anywhere must survive, and repeating a sync must change nothing.

#[cfg(test)]
mod tests {
    use crate::assertions::{
        assert_converged, assert_history_complete, assert_no_data_loss, assert_single_log,
    };
    use crate::harness::ScenarioHarness;
    use pairsync_types::{ResolutionMethod, SessionOutcome, SyncMode};
    use std::time::Duration;

    // ========================================================================
    // C-CONV-* Convergence
    // ========================================================================

    /// C-CONV-01: Two peers with disjoint calendars end up identical.
    #[tokio::test]
    async fn c_conv_01_disjoint_calendars_converge() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();

        phone.create("Standup", 2).await;
        phone.create("Retro", 9).await;
        tablet.create("Dentist", 14).await;

        let round = harness.sync(&phone, &tablet).await;
        assert!(round.completed(), "{round:?}");

        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_no_data_loss(&topology).passed);
        assert!(assert_history_complete(&topology).passed);
        let converged = assert_converged(&topology);
        assert!(converged.passed, "{:?}", converged.failure_details);

        let initiated = round.initiated.unwrap();
        assert_eq!(initiated.events_sent, 2);
        assert_eq!(initiated.events_received, 1);
        assert_eq!(initiated.conflicts, 0);

        assert!(assert_single_log(&phone.logs().await.unwrap(), SessionOutcome::Completed).passed);
        assert!(assert_single_log(&tablet.logs().await.unwrap(), SessionOutcome::Completed).passed);
    }

    /// C-CONV-02: Repeating a sync with no new edits changes nothing.
    #[tokio::test]
    async fn c_conv_02_repeated_sync_is_idempotent() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();

        let lunch = phone.create("Lunch", 5).await;
        tablet.create("Gym", 6).await;
        assert!(harness.sync(&phone, &tablet).await.completed());
        tablet.retitle(lunch.id, "Lunch with Sam").await.unwrap();
        assert!(harness.sync(&tablet, &phone).await.completed());

        let before = harness.topology(&[&phone, &tablet]).await.unwrap();

        let again = harness.sync(&phone, &tablet).await;
        assert!(again.completed());
        let result = again.initiated.unwrap();
        assert_eq!(result.conflicts, 0);
        assert_eq!(result.resolution, ResolutionMethod::Unchanged);

        let after = harness.topology(&[&phone, &tablet]).await.unwrap();
        for (old, new) in before.peers.iter().zip(&after.peers) {
            assert_eq!(old.events, new.events);
            assert_eq!(old.history, new.history);
        }
    }

    /// C-CONV-03: Three devices syncing pairwise around a ring converge.
    #[tokio::test]
    async fn c_conv_03_three_peers_ring_converges() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();
        let laptop = harness.add_peer("laptop").unwrap();

        let shared = phone.create("Planning", 3).await;
        tablet.create("Haircut", 12).await;
        laptop.create("Flight", 20).await;

        assert!(harness.sync(&phone, &tablet).await.completed());
        tablet.relocate(shared.id, "Room 2").await.unwrap();
        phone.move_to_day(shared.id, 4).await.unwrap();

        assert!(harness.sync(&tablet, &laptop).await.completed());
        assert!(harness.sync(&laptop, &phone).await.completed());
        assert!(harness.sync(&phone, &tablet).await.completed());

        let topology = harness.topology(&[&phone, &tablet, &laptop]).await.unwrap();
        assert!(assert_no_data_loss(&topology).passed);
        assert!(assert_history_complete(&topology).passed);
        let converged = assert_converged(&topology);
        assert!(converged.passed, "{:?}", converged.failure_details);

        let merged = laptop.event(shared.id).await.unwrap();
        assert_eq!(merged.location.as_deref(), Some("Room 2"));
        assert_eq!(merged.day, 4);
        assert_eq!(merged.title, "Planning");
    }

    // ========================================================================
    // C-CONF-* Field-level conflicts
    // ========================================================================

    /// C-CONF-01: Edits to different fields merge without a conflict.
    #[tokio::test]
    async fn c_conf_01_disjoint_fields_merge_cleanly() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();

        let review = phone.create("Design review", 10).await;
        assert!(harness.sync(&phone, &tablet).await.completed());

        phone.retitle(review.id, "Design review v2").await.unwrap();
        tablet.move_to_day(review.id, 11).await.unwrap();

        let round = harness.sync(&phone, &tablet).await;
        assert!(round.completed());
        let result = round.initiated.unwrap();
        assert_eq!(result.conflicts, 0);
        assert_eq!(result.resolution, ResolutionMethod::FieldMerge);

        for peer in [&phone, &tablet] {
            let merged = peer.event(review.id).await.unwrap();
            assert_eq!(merged.title, "Design review v2");
            assert_eq!(merged.day, 11);
        }
        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_converged(&topology).passed);
    }

    /// C-CONF-02: Concurrent title edits combine both values in a fixed order.
    #[tokio::test]
    async fn c_conf_02_same_field_edits_are_combined() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();

        let lunch = phone.create("Lunch", 7).await;
        assert!(harness.sync(&phone, &tablet).await.completed());

        // Initiator holds the lexically later value
        phone.retitle(lunch.id, "Lunch with Sam").await.unwrap();
        tablet.retitle(lunch.id, "Lunch at noon").await.unwrap();
        phone.relocate(lunch.id, "Deli").await.unwrap();
        tablet.relocate(lunch.id, "Cafe").await.unwrap();

        let round = harness.sync(&phone, &tablet).await;
        assert!(round.completed());
        let result = round.initiated.unwrap();
        // Two conflicting fields in one event count once
        assert_eq!(result.conflicts, 1);
        assert_eq!(result.resolution, ResolutionMethod::AutoResolved);

        for peer in [&phone, &tablet] {
            let merged = peer.event(lunch.id).await.unwrap();
            assert_eq!(merged.title, "Lunch at noon | Lunch with Sam");
            assert_eq!(merged.location.as_deref(), Some("Cafe | Deli"));
            let logs = peer.logs().await.unwrap();
            assert_eq!(logs.last().unwrap().conflict_count, 1);
            assert_eq!(peer.orchestrator.metrics().snapshot().conflicts_resolved, 1);
        }

        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_converged(&topology).passed);
        assert!(assert_history_complete(&topology).passed);
    }

    /// C-CONF-03: An edit made on one side only is taken as-is.
    #[tokio::test]
    async fn c_conf_03_one_sided_edit_propagates() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();

        let party = phone.create("Party", 25).await;
        assert!(harness.sync(&phone, &tablet).await.completed());
        let moved = tablet.relocate(party.id, "Rooftop").await.unwrap();

        let round = harness.sync(&phone, &tablet).await;
        assert!(round.completed());
        let result = round.initiated.unwrap();
        assert_eq!(result.conflicts, 0);
        assert_eq!(result.resolution, ResolutionMethod::TookRemote);

        assert_eq!(phone.event(party.id).await, Some(moved));
    }

    // ========================================================================
    // C-INC-* Incremental sync
    // ========================================================================

    /// C-INC-01: An incremental sync only carries records changed since the last one.
    #[tokio::test]
    async fn c_inc_01_incremental_sends_only_changes() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();

        phone.create("Standup", 1).await;
        phone.create("Retro", 15).await;
        tablet.create("Dentist", 3).await;
        // Edit clock runs ahead of wall time by up to one tick per edit
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(harness.sync(&phone, &tablet).await.completed());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let offsite = phone.create("Offsite", 28).await;

        let round = harness
            .sync_with_mode(&phone, &tablet, SyncMode::Incremental)
            .await;
        assert!(round.completed());
        let result = round.initiated.unwrap();
        assert_eq!(result.events_sent, 1);
        assert_eq!(result.history_sent, 1);
        assert_eq!(result.events_received, 0);

        assert_eq!(tablet.event(offsite.id).await, Some(offsite));
        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_converged(&topology).passed);
    }

    /// C-INC-02: A one-sided edit of an already-synced event converges incrementally.
    #[tokio::test]
    async fn c_inc_02_incremental_edit_of_synced_event() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();

        let lunch = phone.create("Lunch", 7).await;
        phone.retitle(lunch.id, "Brunch").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(harness.sync(&phone, &tablet).await.completed());

        tokio::time::sleep(Duration::from_millis(5)).await;
        tablet.retitle(lunch.id, "Dinner").await.unwrap();

        let round = harness
            .sync_with_mode(&phone, &tablet, SyncMode::Incremental)
            .await;
        assert!(round.completed(), "{round:?}");
        let result = round.initiated.unwrap();
        assert_eq!(result.conflicts, 0);
        assert_eq!(result.events_received, 1);
        // The edited event arrives with its whole log
        assert_eq!(result.history_received, 3);

        assert_eq!(phone.event(lunch.id).await.unwrap().title, "Dinner");
        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_converged(&topology).passed);
        assert!(assert_history_complete(&topology).passed);
    }
}
