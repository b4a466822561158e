//! Scenario harness: in-process peers on a shared loopback network.
//!
//! Each [`Peer`] owns a real [`SyncOrchestrator`] over a [`LoopbackRadio`]
//! and a [`MemoryRepository`]. Edits go through the same path an app would
//! take (the event and its history entry are stored together), and the
//! harness remembers every id it created so that data loss can be checked
//! afterwards.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pairsync_client::{
    ConfigError, CryptoError, LoopbackNetwork, LoopbackRadio, MemoryRepository, PairingKey,
    PairingSecret, Repository, RepositoryError, SyncConfig, SyncError, SyncOrchestrator,
    SyncResult, KEY_SIZE,
};
use pairsync_types::{
    ChangeKind, EditHistoryEntry, EntryId, Event, EventId, PeerId, SyncLogEntry, SyncMode,
    Timestamp,
};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::assertions::{PeerState, TopologyState};

/// Pairing secret shared by peers unless a scenario says otherwise.
pub const SHARED_SECRET: [u8; KEY_SIZE] = [7; KEY_SIZE];

/// How long a responder may take to finish after the initiator returned.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while setting up or editing peers.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Peer configuration was rejected.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Pairing key derivation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Repository operation failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// An edit referenced an event the peer does not have.
    #[error("{peer} has no event {event}")]
    MissingEvent {
        /// Peer name.
        peer: String,
        /// Requested event.
        event: EventId,
    },
}

/// Outcome of one sync between two peers.
#[derive(Debug)]
pub struct SyncRound {
    /// What the initiator's `start_sync` returned.
    pub initiated: Result<SyncResult, SyncError>,
    /// Every session the responder served, in order.
    pub served: Vec<Result<SyncResult, SyncError>>,
}

impl SyncRound {
    /// Whether both sides finished their last session successfully.
    pub fn completed(&self) -> bool {
        self.initiated.is_ok() && matches!(self.served.last(), Some(Ok(_)))
    }
}

/// Ids created through the harness, across all peers.
#[derive(Debug, Default)]
struct Ledger {
    events: HashSet<EventId>,
    history: HashSet<EntryId>,
}

/// Strictly increasing wall clock shared by all peers.
#[derive(Debug, Default)]
struct Clock {
    last: AtomicU64,
}

impl Clock {
    fn tick(&self) -> Timestamp {
        let now = Timestamp::now().as_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        Timestamp::from_millis(now.max(previous + 1))
    }
}

/// One simulated device.
pub struct Peer {
    /// Device name (also its device id).
    pub name: String,
    /// Radio address other peers connect to.
    pub address: PeerId,
    /// The peer's radio, for fault injection.
    pub radio: Arc<LoopbackRadio>,
    /// The peer's storage.
    pub repo: Arc<MemoryRepository>,
    /// The peer's sync engine.
    pub orchestrator: SyncOrchestrator<LoopbackRadio, MemoryRepository>,
    clock: Arc<Clock>,
    ledger: Arc<Mutex<Ledger>>,
}

impl Peer {
    /// Create an event with its creation entry.
    pub async fn create(&self, title: &str, day: u8) -> Event {
        let at = self.clock.tick();
        let event = Event {
            id: EventId::new(),
            month: 9,
            title: title.to_string(),
            location: None,
            day,
            created_at: at,
            last_modified_at: at,
            last_modified_by: self.orchestrator.device_id().clone(),
            color: "teal".to_string(),
        };
        let mut entry = self.entry(event.id, ChangeKind::Create, at);
        entry.new_title = Some(event.title.clone());
        entry.new_day = Some(day);

        self.record(event.clone(), entry).await;
        event
    }

    /// Change an event's title.
    pub async fn retitle(&self, id: EventId, title: &str) -> Result<Event, HarnessError> {
        self.edit(id, |event, entry| {
            entry.previous_title = Some(event.title.clone());
            entry.new_title = Some(title.to_string());
            event.title = title.to_string();
        })
        .await
    }

    /// Change an event's location.
    pub async fn relocate(&self, id: EventId, location: &str) -> Result<Event, HarnessError> {
        self.edit(id, |event, entry| {
            entry.previous_location = event.location.clone();
            entry.new_location = Some(location.to_string());
            event.location = Some(location.to_string());
        })
        .await
    }

    /// Move an event to another day of its month.
    pub async fn move_to_day(&self, id: EventId, day: u8) -> Result<Event, HarnessError> {
        self.edit(id, |event, entry| {
            entry.previous_day = Some(event.day);
            entry.new_day = Some(day);
            event.day = day;
        })
        .await
    }

    /// Current copy of an event.
    pub async fn event(&self, id: EventId) -> Option<Event> {
        self.repo.event(id).await
    }

    /// Session log entries, oldest first.
    pub async fn logs(&self) -> Result<Vec<SyncLogEntry>, HarnessError> {
        Ok(self.repo.sync_logs().await?)
    }

    /// Snapshot of this peer for the assertion helpers.
    pub async fn state(&self) -> Result<PeerState, HarnessError> {
        let events = self.repo.get_events(None).await?;
        let history = self.repo.get_history(None).await?;
        Ok(PeerState {
            peer_id: self.name.clone(),
            events: events.into_iter().map(|e| (e.id, e)).collect(),
            history: history.into_iter().map(|e| e.id).collect(),
        })
    }

    async fn edit(
        &self,
        id: EventId,
        apply: impl FnOnce(&mut Event, &mut EditHistoryEntry),
    ) -> Result<Event, HarnessError> {
        let mut event = self
            .repo
            .event(id)
            .await
            .ok_or_else(|| HarnessError::MissingEvent {
                peer: self.name.clone(),
                event: id,
            })?;
        let at = self.clock.tick();
        let mut entry = self.entry(id, ChangeKind::Update, at);
        apply(&mut event, &mut entry);
        event.last_modified_at = at;
        event.last_modified_by = self.orchestrator.device_id().clone();

        self.record(event.clone(), entry).await;
        Ok(event)
    }

    async fn record(&self, event: Event, entry: EditHistoryEntry) {
        {
            let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            ledger.events.insert(event.id);
            ledger.history.insert(entry.id);
        }
        debug!(peer = %self.name, event = %event.id, change = ?entry.change, "local edit");
        self.repo.record_edit(event, entry).await;
    }

    fn entry(&self, event: EventId, change: ChangeKind, at: Timestamp) -> EditHistoryEntry {
        EditHistoryEntry {
            id: EntryId::new(),
            event_id: event,
            device_id: self.orchestrator.device_id().clone(),
            device_name: self.name.clone(),
            change,
            previous_title: None,
            new_title: None,
            previous_location: None,
            new_location: None,
            previous_day: None,
            new_day: None,
            timestamp: at,
        }
    }
}

/// Builds peers and drives sessions between them.
pub struct ScenarioHarness {
    network: LoopbackNetwork,
    config: SyncConfig,
    clock: Arc<Clock>,
    ledger: Arc<Mutex<Ledger>>,
}

impl Default for ScenarioHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioHarness {
    /// Harness with fast retries and short timeouts.
    pub fn new() -> Self {
        let mut config = SyncConfig::default();
        config.retry.base_delay_ms = 5;
        config.retry.max_delay_ms = 50;
        config.session.verify_timeout_secs = 2;
        config.session.receive_timeout_secs = 2;
        Self::with_config(config)
    }

    /// Harness whose peers all start from `config`.
    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            network: LoopbackNetwork::new(),
            config,
            clock: Arc::new(Clock::default()),
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    /// The shared radio network.
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    /// Add a peer paired with [`SHARED_SECRET`].
    pub fn add_peer(&self, name: &str) -> Result<Peer, HarnessError> {
        self.add_peer_with_secret(name, SHARED_SECRET)
    }

    /// Add a peer paired with a specific secret.
    pub fn add_peer_with_secret(
        &self,
        name: &str,
        secret: [u8; KEY_SIZE],
    ) -> Result<Peer, HarnessError> {
        let key = PairingKey::derive(&PairingSecret::from_bytes(secret))?;

        let mut config = self.config.clone();
        config.device.name = name.to_string();
        config.device.id = Some(name.to_string());

        let address = PeerId::new(format!("radio:{name}"));
        let radio = Arc::new(self.network.radio(address.as_str()));
        let repo = Arc::new(MemoryRepository::new());
        let orchestrator =
            SyncOrchestrator::new(Arc::clone(&radio), Arc::clone(&repo), key, config)?;

        Ok(Peer {
            name: name.to_string(),
            address,
            radio,
            repo,
            orchestrator,
            clock: Arc::clone(&self.clock),
            ledger: Arc::clone(&self.ledger),
        })
    }

    /// Full sync initiated by `from`, served by `to`.
    pub async fn sync(&self, from: &Peer, to: &Peer) -> SyncRound {
        self.sync_with_mode(from, to, SyncMode::Full).await
    }

    /// Sync initiated by `from` in `mode`; `to` serves until `from` is done.
    ///
    /// The responder keeps accepting sessions while the initiator retries,
    /// and a session it is still finishing is awaited rather than dropped.
    pub async fn sync_with_mode(&self, from: &Peer, to: &Peer, mode: SyncMode) -> SyncRound {
        let mut initiate = Box::pin(from.orchestrator.start_sync(&to.address, mode, None));
        let mut serving = Box::pin(to.orchestrator.serve_next());
        let mut served = Vec::new();

        let initiated = loop {
            tokio::select! {
                result = &mut initiate => break result,
                outcome = &mut serving => {
                    served.push(outcome);
                    serving = Box::pin(to.orchestrator.serve_next());
                }
            }
        };

        if to.orchestrator.is_active(&from.address) {
            match timeout(SETTLE_TIMEOUT, serving).await {
                Ok(outcome) => served.push(outcome),
                Err(_) => debug!(to = %to.name, "responder did not settle"),
            }
        }
        debug!(
            from = %from.name,
            to = %to.name,
            ok = initiated.is_ok(),
            sessions = served.len(),
            "sync round finished"
        );
        SyncRound { initiated, served }
    }

    /// Snapshot of `peers` plus every id the harness created.
    pub async fn topology(&self, peers: &[&Peer]) -> Result<TopologyState, HarnessError> {
        let mut states = Vec::with_capacity(peers.len());
        for peer in peers {
            states.push(peer.state().await?);
        }
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(TopologyState {
            peers: states,
            all_created_events: ledger.events.clone(),
            all_history_entries: ledger.history.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_strictly_increasing() {
        let clock = Clock::default();
        let mut previous = clock.tick();
        for _ in 0..100 {
            let next = clock.tick();
            assert!(next > previous);
            previous = next;
        }
    }

    #[tokio::test]
    async fn edits_are_recorded_with_history() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();

        let event = phone.create("Dentist", 4).await;
        let moved = phone.move_to_day(event.id, 5).await.unwrap();
        assert_eq!(moved.day, 5);
        assert!(moved.last_modified_at > event.last_modified_at);

        let state = phone.state().await.unwrap();
        assert_eq!(state.events[&event.id].day, 5);
        assert_eq!(state.history.len(), 2);

        let topology = harness.topology(&[&phone]).await.unwrap();
        assert_eq!(topology.all_created_events.len(), 1);
        assert_eq!(topology.all_history_entries.len(), 2);
    }

    #[tokio::test]
    async fn editing_unknown_event_fails() {
        let harness = ScenarioHarness::new();
        let phone = harness.add_peer("phone").unwrap();

        let result = phone.retitle(EventId::new(), "Ghost").await;
        assert!(matches!(result, Err(HarnessError::MissingEvent { .. })));
    }
}
