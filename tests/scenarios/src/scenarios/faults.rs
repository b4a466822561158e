//! Fault scenarios (F-LINK-*, F-SEC-*, F-PROTO-*).
//!
//! Degraded radio links must be retried until the data gets through, while
//! a peer with the wrong key or protocol version must be refused at once.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::assertions::{assert_converged, assert_no_data_loss, assert_single_log};
    use crate::harness::{ScenarioHarness, SHARED_SECRET};
    use pairsync_client::{
        MemoryRepository, MockRadio, PairingKey, PairingSecret, Repository, SessionError,
        SyncConfig, SyncError, SyncOrchestrator, KEY_SIZE,
    };
    use pairsync_types::{
        Bye, Message, PeerId, ProtocolError, SessionOutcome, SyncMode, PROTOCOL_VERSION,
    };

    // ========================================================================
    // F-LINK-* Degraded links
    // ========================================================================

    /// F-LINK-01: Two dropped connects, then success; one log entry with the final conflict count.
    #[tokio::test]
    async fn f_link_01_dropped_connects_leave_one_log_entry() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();

        let lunch = phone.create("Lunch", 7).await;
        assert!(harness.sync(&phone, &tablet).await.completed());
        phone.retitle(lunch.id, "Lunch downtown").await.unwrap();
        tablet.retitle(lunch.id, "Lunch at home").await.unwrap();

        phone.radio.drop_next_connects(2);
        let round = harness.sync(&phone, &tablet).await;
        assert!(round.completed(), "{round:?}");
        // Dropped connects never reach the responder
        assert_eq!(round.served.len(), 1);

        let result = round.initiated.unwrap();
        assert_eq!(result.attempts, 3);
        assert_eq!(result.conflicts, 1);

        let logs = phone.logs().await.unwrap();
        let second = &logs[1..];
        assert!(assert_single_log(second, SessionOutcome::Completed).passed);
        assert_eq!(second[0].conflict_count, 1);

        let metrics = phone.orchestrator.metrics().snapshot();
        assert_eq!(metrics.retries_total, 2);
        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_converged(&topology).passed);
        assert_eq!(
            tablet.event(lunch.id).await.unwrap().title,
            "Lunch at home | Lunch downtown"
        );
    }

    /// F-LINK-02: A corrupted chunk is retransmitted inside the same attempt.
    #[tokio::test]
    async fn f_link_02_corrupted_chunk_is_retransmitted() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();
        phone.create("Standup", 2).await;
        phone.create("Retro", 16).await;

        phone.radio.corrupt_next_chunks(1);
        let round = harness.sync(&phone, &tablet).await;
        assert!(round.completed(), "{round:?}");
        assert_eq!(round.initiated.unwrap().attempts, 1);
        assert_eq!(phone.orchestrator.metrics().snapshot().chunks_retransmitted, 1);

        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_no_data_loss(&topology).passed);
        assert!(assert_converged(&topology).passed);
    }

    /// F-LINK-03: Link severed while sending data; the retry completes the sync.
    #[tokio::test]
    async fn f_link_03_severed_link_is_retried() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let tablet = harness.add_peer("tablet").unwrap();
        phone.create("Standup", 2).await;
        tablet.create("Dentist", 18).await;

        // Challenge, confirmation and SyncRequest get through; the first chunk does not
        phone.radio.sever_after_sends(3);
        let round = harness.sync(&phone, &tablet).await;
        assert!(round.completed(), "{round:?}");
        assert_eq!(round.initiated.as_ref().unwrap().attempts, 2);

        assert!(assert_single_log(&phone.logs().await.unwrap(), SessionOutcome::Completed).passed);
        let tablet_logs = tablet.logs().await.unwrap();
        assert_eq!(tablet_logs.last().unwrap().outcome, SessionOutcome::Completed);

        let topology = harness.topology(&[&phone, &tablet]).await.unwrap();
        assert!(assert_no_data_loss(&topology).passed);
        assert!(assert_converged(&topology).passed);
    }

    /// F-LINK-04: An unreachable peer exhausts the retry budget.
    #[tokio::test]
    async fn f_link_04_unreachable_peer_exhausts_retries() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let nowhere = PeerId::new("radio:nowhere");

        let err = phone
            .orchestrator
            .start_sync(&nowhere, SyncMode::Full, None)
            .await
            .unwrap_err();

        match err {
            SyncError::MaxRetriesExceeded { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected MaxRetriesExceeded, got {other}"),
        }
        let logs = phone.logs().await.unwrap();
        assert!(assert_single_log(&logs, SessionOutcome::Failed).passed);
        assert!(logs[0].details.contains("3 attempts"));
        assert_eq!(phone.orchestrator.metrics().snapshot().attempts_total, 3);
    }

    // ========================================================================
    // F-SEC-* Pairing
    // ========================================================================

    /// F-SEC-01: A peer paired with another secret is refused without retries.
    #[tokio::test]
    async fn f_sec_01_wrong_pairing_key_is_refused() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();
        let stranger = harness.add_peer_with_secret("stranger", [9; KEY_SIZE]).unwrap();
        phone.create("Private", 1).await;
        stranger.create("Other", 2).await;

        let round = harness.sync(&phone, &stranger).await;

        assert!(matches!(
            round.initiated,
            Err(SyncError::Session(SessionError::SecurityVerificationFailed(_)))
        ));
        assert_eq!(phone.orchestrator.metrics().snapshot().attempts_total, 1);
        // Nothing crossed over, and the unverified peer leaves no log
        assert_eq!(stranger.state().await.unwrap().events.len(), 1);
        assert_eq!(phone.state().await.unwrap().events.len(), 1);
        assert!(stranger.logs().await.unwrap().is_empty());
    }

    // ========================================================================
    // F-PROTO-* Protocol
    // ========================================================================

    /// F-PROTO-01: A peer speaking another protocol version is not retried.
    #[tokio::test]
    async fn f_proto_01_version_mismatch_is_terminal() {
        let radio = Arc::new(MockRadio::new());
        let mut frame = Message::Bye(Bye { reason: None }).to_frame().unwrap();
        frame[0] = PROTOCOL_VERSION + 1;
        radio.queue_response(frame);

        let repo = Arc::new(MemoryRepository::new());
        let key = PairingKey::derive(&PairingSecret::from_bytes(SHARED_SECRET)).unwrap();
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&radio),
            Arc::clone(&repo),
            key,
            SyncConfig::default(),
        )
        .unwrap();

        let err = orchestrator
            .start_sync(&PeerId::new("radio:future"), SyncMode::Full, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Session(SessionError::Protocol(ProtocolError::UnsupportedVersion {
                received: 2,
                ..
            }))
        ));
        assert_eq!(radio.connect_attempts(), 1);
        let metrics = orchestrator.metrics().snapshot();
        assert_eq!(metrics.attempts_total, 1);
        assert_eq!(metrics.retries_total, 0);
        let logs = repo.sync_logs().await.unwrap();
        assert!(assert_single_log(&logs, SessionOutcome::Failed).passed);
    }
}
