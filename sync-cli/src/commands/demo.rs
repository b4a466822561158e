//! Demo command - two in-process peers syncing over a loopback radio.
//!
//! The demo seeds each peer with an event, runs a full sync, edits the
//! shared event on both peers (the same field with `--conflict`, disjoint
//! fields otherwise), optionally degrades the link, and syncs again.

use anyhow::{Context, Result};
use pairsync_client::{
    Argon2Params, LoopbackNetwork, LoopbackRadio, MemoryRepository, MetricsSnapshot, PairingKey,
    Repository, SyncConfig, SyncOrchestrator, SyncResult,
};
use pairsync_types::{
    ChangeKind, DeviceId, EditHistoryEntry, EntryId, Event, EventId, PeerId, SyncMode, Timestamp,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How long to wait for the responder to finish after the initiator did.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for the demo command.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Pairing passphrase shared by both peers.
    pub passphrase: String,
    /// Edit the same field on both peers.
    pub conflict: bool,
    /// Connects to fail before the second sync.
    pub drop_connects: u32,
    /// Data chunks to corrupt during the second sync.
    pub corrupt_chunks: u32,
}

/// Everything the demo prints.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    /// Initiator results, one per sync.
    pub syncs: Vec<SyncResult>,
    /// Events on the initiating peer afterwards.
    pub alice_events: Vec<Event>,
    /// Events on the responding peer afterwards.
    pub bob_events: Vec<Event>,
    /// Whether both peers hold the same events.
    pub converged: bool,
    /// Initiator counters.
    pub metrics: MetricsSnapshot,
}

/// One simulated device.
struct DemoPeer {
    name: &'static str,
    device: DeviceId,
    address: PeerId,
    radio: Arc<LoopbackRadio>,
    repo: Arc<MemoryRepository>,
    orchestrator: SyncOrchestrator<LoopbackRadio, MemoryRepository>,
}

impl DemoPeer {
    fn new(
        net: &LoopbackNetwork,
        name: &'static str,
        config: &SyncConfig,
        key: PairingKey,
    ) -> Result<Self> {
        let mut config = config.clone();
        config.device.name = name.to_string();
        config.device.id = Some(format!("{name}-device"));
        let device = config.device_id();

        let address = PeerId::new(format!("radio:{name}"));
        let radio = Arc::new(net.radio(address.as_str()));
        let repo = Arc::new(MemoryRepository::new());
        let orchestrator =
            SyncOrchestrator::new(Arc::clone(&radio), Arc::clone(&repo), key, config)?;

        Ok(Self {
            name,
            device,
            address,
            radio,
            repo,
            orchestrator,
        })
    }

    /// Store a new event with its creation entry.
    async fn create(&self, title: &str, day: u8) -> Event {
        let now = Timestamp::now();
        let event = Event {
            id: EventId::new(),
            month: 6,
            title: title.to_string(),
            location: None,
            day,
            created_at: now,
            last_modified_at: now,
            last_modified_by: self.device.clone(),
            color: "blue".to_string(),
        };
        let mut entry = self.entry(&event, ChangeKind::Create, now);
        entry.new_title = Some(event.title.clone());
        entry.new_day = Some(day);
        self.repo.record_edit(event.clone(), entry).await;
        event
    }

    async fn retitle(&self, id: EventId, title: &str) -> Result<()> {
        let mut event = self.current(id).await?;
        let now = Timestamp::now();
        let mut entry = self.entry(&event, ChangeKind::Update, now);
        entry.previous_title = Some(event.title.clone());
        entry.new_title = Some(title.to_string());

        event.title = title.to_string();
        event.last_modified_at = now;
        event.last_modified_by = self.device.clone();
        self.repo.record_edit(event, entry).await;
        Ok(())
    }

    async fn move_to_day(&self, id: EventId, day: u8) -> Result<()> {
        let mut event = self.current(id).await?;
        let now = Timestamp::now();
        let mut entry = self.entry(&event, ChangeKind::Update, now);
        entry.previous_day = Some(event.day);
        entry.new_day = Some(day);

        event.day = day;
        event.last_modified_at = now;
        event.last_modified_by = self.device.clone();
        self.repo.record_edit(event, entry).await;
        Ok(())
    }

    async fn current(&self, id: EventId) -> Result<Event> {
        self.repo
            .event(id)
            .await
            .with_context(|| format!("{} does not have event {id}", self.name))
    }

    fn entry(&self, event: &Event, change: ChangeKind, at: Timestamp) -> EditHistoryEntry {
        EditHistoryEntry {
            id: EntryId::new(),
            event_id: event.id,
            device_id: self.device.clone(),
            device_name: self.name.to_string(),
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

/// Run the demo command.
pub async fn run(config: &SyncConfig, options: &DemoOptions) -> Result<()> {
    let report = simulate(config, options).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.converged {
        anyhow::bail!("peers did not converge");
    }
    Ok(())
}

/// Run both peers and collect what happened.
pub async fn simulate(config: &SyncConfig, options: &DemoOptions) -> Result<DemoReport> {
    let key = PairingKey::from_passphrase(&options.passphrase, Argon2Params::default())
        .context("Failed to derive pairing key")?;

    let net = LoopbackNetwork::new();
    let alice = DemoPeer::new(&net, "alice", config, key.clone())?;
    let bob = Arc::new(DemoPeer::new(&net, "bob", config, key)?);

    let (served_tx, mut served_rx) = mpsc::channel(8);
    let server = {
        let bob = Arc::clone(&bob);
        tokio::spawn(async move {
            loop {
                let outcome = bob.orchestrator.serve_next().await;
                if let Err(err) = &outcome {
                    warn!(error = %err, "bob could not serve a session");
                }
                if served_tx.send(outcome.is_ok()).await.is_err() {
                    break;
                }
            }
        })
    };

    let standup = alice.create("Team standup", 3).await;
    bob.create("Dentist", 11).await;

    let mut syncs = Vec::new();
    syncs.push(sync_once(&alice, &bob.address, &mut served_rx).await?);

    if options.conflict {
        alice.retitle(standup.id, "Standup (room 4)").await?;
        bob.retitle(standup.id, "Standup with design").await?;
    } else {
        alice.retitle(standup.id, "Standup (room 4)").await?;
        bob.move_to_day(standup.id, 4).await?;
    }

    alice.radio.drop_next_connects(options.drop_connects);
    alice.radio.corrupt_next_chunks(options.corrupt_chunks);
    syncs.push(sync_once(&alice, &bob.address, &mut served_rx).await?);

    server.abort();

    let alice_events = alice.repo.get_events(None).await?;
    let bob_events = bob.repo.get_events(None).await?;
    let converged = alice_events == bob_events;
    info!(converged, "demo finished");

    Ok(DemoReport {
        syncs,
        alice_events,
        bob_events,
        converged,
        metrics: alice.orchestrator.metrics().snapshot(),
    })
}

/// Sync alice with bob and wait until bob has finished his side too.
async fn sync_once(
    alice: &DemoPeer,
    bob: &PeerId,
    served: &mut mpsc::Receiver<bool>,
) -> Result<SyncResult> {
    let result = alice
        .orchestrator
        .start_sync(bob, SyncMode::Full, None)
        .await
        .context("Sync failed")?;

    loop {
        match tokio::time::timeout(SETTLE_TIMEOUT, served.recv()).await {
            Ok(Some(true)) => break,
            Ok(Some(false)) => continue,
            Ok(None) | Err(_) => anyhow::bail!("bob did not finish the session"),
        }
    }
    Ok(result)
}
