//! Session lifecycle scenarios (S-CONC-*, S-CANCEL-*, S-COMMIT-*, S-PROG-*).
//!
//! One session per peer at a time, cancellation at any point, and a failed
//! commit must never leave partial state behind.

#[cfg(test)]
mod tests {
    use crate::assertions::{
        assert_converged, assert_event_present, assert_no_data_loss, assert_single_log,
    };
    use crate::harness::ScenarioHarness;
    use pairsync_client::{Repository, RepositoryError, SyncError};
    use pairsync_core::SyncPhase;
    use pairsync_types::{PeerId, SessionOutcome, SyncMode};

    // ========================================================================
    // S-CONC-* Concurrency
    // ========================================================================

    /// S-CONC-01: A second sync with a peer that already has one is rejected.
    #[tokio::test]
    async fn s_conc_01_second_sync_with_same_peer_is_rejected() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        // Registered but never serving
        let _silent_radio = harness.network().radio("radio:silent");
        let silent = PeerId::new("radio:silent");

        let (first, second) = tokio::join!(
            phone.orchestrator.start_sync(&silent, SyncMode::Full, None),
            async {
                while !phone.orchestrator.is_active(&silent) {
                    tokio::task::yield_now().await;
                }
                let second = phone
                    .orchestrator
                    .start_sync(&silent, SyncMode::Full, None)
                    .await;
                assert!(phone.orchestrator.cancel_sync(&silent));
                second
            }
        );

        assert!(matches!(second, Err(SyncError::SyncAlreadyInProgress(_))));
        assert!(matches!(first, Err(SyncError::SyncCancelled)));
        // Only the session that ran is logged
        let logs = phone.logs().await.unwrap();
        assert!(assert_single_log(&logs, SessionOutcome::Cancelled).passed);
    }

    /// S-CONC-02: Sessions with different peers run side by side.
    #[tokio::test]
    async fn s_conc_02_sessions_with_different_peers_overlap() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();
        let laptop = harness.add_peer("laptop").unwrap();

        let standup = phone.create("Standup", 2).await;
        let dentist = tablet.create("Dentist", 8).await;
        let flight = laptop.create("Flight", 21).await;

        let (with_tablet, with_laptop) = tokio::join!(
            harness.sync(&phone, &tablet),
            harness.sync(&phone, &laptop)
        );
        assert!(with_tablet.completed(), "{with_tablet:?}");
        assert!(with_laptop.completed(), "{with_laptop:?}");

        let hub = phone.state().await.unwrap();
        assert!(assert_event_present(&hub, dentist.id).passed);
        assert!(assert_event_present(&hub, flight.id).passed);
        assert_eq!(tablet.event(standup.id).await, Some(standup.clone()));
        assert_eq!(laptop.event(standup.id).await, Some(standup));
        assert_eq!(phone.logs().await.unwrap().len(), 2);
    }

    /// S-CONC-03: Overlapping sessions editing one event both land on the hub.
    #[tokio::test]
    async fn s_conc_03_overlapping_merges_of_one_event_keep_both_edits() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();
        let laptop = harness.add_peer("laptop").unwrap();

        let lunch = phone.create("Lunch", 7).await;
        assert!(harness.sync(&phone, &tablet).await.completed());
        assert!(harness.sync(&phone, &laptop).await.completed());

        tablet.retitle(lunch.id, "Brunch").await.unwrap();
        laptop.move_to_day(lunch.id, 9).await.unwrap();

        let (with_tablet, with_laptop) = tokio::join!(
            harness.sync(&phone, &tablet),
            harness.sync(&phone, &laptop)
        );
        assert!(with_tablet.completed(), "{with_tablet:?}");
        assert!(with_laptop.completed(), "{with_laptop:?}");
        assert_eq!(with_tablet.initiated.unwrap().conflicts, 0);
        assert_eq!(with_laptop.initiated.unwrap().conflicts, 0);

        let merged = phone.event(lunch.id).await.unwrap();
        assert_eq!(merged.title, "Brunch");
        assert_eq!(merged.day, 9);
    }

    // ========================================================================
    // S-CANCEL-* Cancellation
    // ========================================================================

    /// S-CANCEL-01: Cancelling a session logs it and writes no data.
    #[tokio::test]
    async fn s_cancel_01_cancelled_session_writes_nothing() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let _silent_radio = harness.network().radio("radio:silent");
        let silent = PeerId::new("radio:silent");
        phone.create("Standup", 2).await;
        let progress = phone.orchestrator.subscribe(&silent);

        let (result, cancelled) = tokio::join!(
            phone.orchestrator.start_sync(&silent, SyncMode::Full, None),
            async {
                while !phone.orchestrator.is_active(&silent) {
                    tokio::task::yield_now().await;
                }
                phone.orchestrator.cancel_sync(&silent)
            }
        );

        assert!(cancelled);
        assert!(matches!(result, Err(SyncError::SyncCancelled)));
        assert_eq!(progress.borrow().phase, SyncPhase::Failed);
        assert!(!phone.orchestrator.is_active(&silent));
        assert!(!phone.orchestrator.cancel_sync(&silent));

        assert_eq!(phone.repo.commit_count().await, 0);
        let logs = phone.logs().await.unwrap();
        assert!(assert_single_log(&logs, SessionOutcome::Cancelled).passed);
        assert_eq!(phone.orchestrator.metrics().snapshot().sessions_cancelled, 1);
    }

    // ========================================================================
    // S-COMMIT-* Atomic commit
    // ========================================================================

    /// S-COMMIT-01: A failed commit leaves the responder untouched; the next sync repairs it.
    #[tokio::test]
    async fn s_commit_01_failed_commit_is_atomic_and_recoverable() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();
        let standup = phone.create("Standup", 2).await;
        tablet.create("Dentist", 8).await;

        tablet.repo.fail_next_commit("disk full");
        let round = harness.sync(&phone, &tablet).await;

        assert!(round.initiated.is_ok());
        assert!(matches!(
            round.served.last(),
            Some(Err(SyncError::Repository(RepositoryError::CommitFailed(_))))
        ));
        assert_eq!(tablet.event(standup.id).await, None);
        assert!(tablet.repo.get_peer(&phone.address).await.unwrap().is_none());
        let logs = tablet.logs().await.unwrap();
        assert!(assert_single_log(&logs, SessionOutcome::Failed).passed);
        assert!(logs[0].details.contains("finalizing"));

        let retry = harness.sync(&phone, &tablet).await;
        assert!(retry.completed(), "{retry:?}");
        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_no_data_loss(&topology).passed);
        assert!(assert_converged(&topology).passed);
    }

    // ========================================================================
    // S-PROG-* Progress reporting
    // ========================================================================

    /// S-PROG-01: Both roles report Done at full progress once a sync completes.
    #[tokio::test]
    async fn s_prog_01_both_roles_finish_at_done() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();
        phone.create("Standup", 2).await;

        let initiator = phone.orchestrator.subscribe(&tablet.address);
        let responder = tablet.orchestrator.subscribe(&phone.address);
        assert_eq!(initiator.borrow().phase, SyncPhase::NotConnected);

        assert!(harness.sync(&phone, &tablet).await.completed());

        for progress in [&initiator, &responder] {
            let last = *progress.borrow();
            assert_eq!(last.phase, SyncPhase::Done);
            assert_eq!(last.progress, 1.0);
        }
        assert!(phone.orchestrator.last_result(&tablet.address).is_some());
        assert!(tablet.orchestrator.last_result(&phone.address).is_some());
    }
}
