//! SyncOrchestrator - drives whole sync sessions with peers.
//!
//! The orchestrator owns the per-peer session registry and everything around
//! a [`PeerSession`]: retries with backoff, the phase/progress machine from
//! `pairsync-core`, the merge, the repository commit and the session log.
//!
//! ```text
//! Application → SyncOrchestrator → PeerSession → RadioTransport
//!                     ↓                 ↓
//!               plan_merge (pure)   TransportState (pure)
//!                     ↓
//!                 Repository
//! ```
//!
//! Either peer may initiate with [`SyncOrchestrator::start_sync`]; the other
//! answers with [`SyncOrchestrator::serve_next`]. Both sides send their
//! events and history, merge what they received, and commit the result in
//! one transaction. Every session that passed verification leaves exactly
//! one [`SyncLogEntry`], whatever its outcome.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = SyncOrchestrator::new(radio, repo, key, SyncConfig::default())?;
//! let result = orchestrator
//!     .start_sync(&PeerId::new("radio:kitchen"), SyncMode::Full, None)
//!     .await?;
//! println!("{} conflicts", result.conflicts);
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pairsync_core::{plan_merge, MergePlan, MergePolicy, PhaseTracker, RetryPolicy, SyncPhase};
use pairsync_types::{
    decode_events, decode_history, encode_batch, DeviceId, EditHistoryEntry, EntityKind, Event,
    EventId, Message, PeerDevice, PeerId, ProtocolError, ResolutionMethod, SessionOutcome,
    SyncComplete, SyncLogEntry, SyncMode, SyncRequest, SyncResponse, Timestamp,
};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SessionConfig, SyncConfig};
use crate::crypto::PairingKey;
use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::repository::{CommitBatch, Repository};
use crate::session::{unexpected, CancelToken, PeerSession};
use crate::transport::RadioTransport;

/// Reason sent when declining a request because a session is already running.
pub const BUSY_REASON: &str = "sync already in progress";

/// Which end of a session this device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    /// Opened the link and sent the SyncRequest.
    Initiator,
    /// Accepted the link and answered the SyncRequest.
    Responder,
}

/// Phase and progress of the current or last session with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncProgress {
    /// Current phase.
    pub phase: SyncPhase,
    /// 0.0 at start, 1.0 at a terminal phase, never decreasing in between.
    pub progress: f32,
}

/// Terminal summary of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Peer the session was with.
    pub peer: PeerId,
    /// Our role.
    pub role: SessionRole,
    /// How the session ended.
    pub outcome: SessionOutcome,
    /// Events sent in the final attempt.
    pub events_sent: u32,
    /// Events received in the final attempt.
    pub events_received: u32,
    /// History entries sent in the final attempt.
    pub history_sent: u32,
    /// History entries received in the final attempt.
    pub history_received: u32,
    /// Events whose merge had a conflicting field.
    pub conflicts: u32,
    /// Strongest resolution applied.
    pub resolution: ResolutionMethod,
    /// Attempts made, the first included.
    pub attempts: u32,
    /// Error text for failed or cancelled sessions.
    pub error: Option<String>,
}

/// Registry entry for a running session.
#[derive(Debug, Clone)]
struct ActiveSession {
    role: SessionRole,
    cancel: CancelToken,
}

/// Removes a peer from the active registry when dropped.
struct ActiveGuard<'a> {
    active: &'a DashMap<PeerId, ActiveSession>,
    peer: PeerId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.peer);
    }
}

/// Counters of one attempt.
#[derive(Debug, Clone, Copy)]
struct Tally {
    events_sent: u32,
    events_received: u32,
    history_sent: u32,
    history_received: u32,
    conflicts: u32,
    resolution: ResolutionMethod,
}

impl Default for Tally {
    fn default() -> Self {
        Self {
            events_sent: 0,
            events_received: 0,
            history_sent: 0,
            history_received: 0,
            conflicts: 0,
            resolution: ResolutionMethod::Unchanged,
        }
    }
}

/// Bookkeeping for one session, across its attempts.
#[derive(Debug)]
struct SessionRun {
    peer: PeerId,
    role: SessionRole,
    cancel: CancelToken,
    tracker: PhaseTracker,
    tally: Tally,
    attempts: u32,
    peer_name: Option<String>,
    started: Timestamp,
}

impl SessionRun {
    fn new(peer: PeerId, role: SessionRole, cancel: CancelToken) -> Self {
        Self {
            peer,
            role,
            cancel,
            tracker: PhaseTracker::new(),
            tally: Tally::default(),
            attempts: 0,
            peer_name: None,
            started: Timestamp::now(),
        }
    }
}

/// Records read from the local repository for sending.
struct LocalData {
    events: Vec<Event>,
    history: Vec<EditHistoryEntry>,
}

/// What a completed exchange produced.
struct Exchange {
    device: DeviceId,
    events: Vec<Event>,
    history: Vec<EditHistoryEntry>,
}

/// What the commit wrote.
struct Committed {
    events: usize,
    history: usize,
}

/// Drives sync sessions over one radio against one repository.
pub struct SyncOrchestrator<R: RadioTransport, S: Repository> {
    radio: Arc<R>,
    repo: Arc<S>,
    key: Arc<PairingKey>,
    session_config: SessionConfig,
    device_id: DeviceId,
    device_name: String,
    merge_policy: MergePolicy,
    retry: RetryPolicy,
    metrics: Arc<SyncMetrics>,
    active: DashMap<PeerId, ActiveSession>,
    progress: DashMap<PeerId, watch::Sender<SyncProgress>>,
    results: DashMap<PeerId, SyncResult>,
    /// Held from reading local state for a merge until its commit.
    merge_lock: Mutex<()>,
}

impl<R: RadioTransport, S: Repository> std::fmt::Debug for SyncOrchestrator<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("device_id", &self.device_id)
            .field("device_name", &self.device_name)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl<R: RadioTransport, S: Repository> SyncOrchestrator<R, S> {
    /// Create an orchestrator. Fails if `config` does not validate.
    pub fn new(
        radio: Arc<R>,
        repo: Arc<S>,
        key: PairingKey,
        config: SyncConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            radio,
            repo,
            key: Arc::new(key),
            device_id: config.device_id(),
            device_name: config.device.name.clone(),
            merge_policy: config.merge_policy()?,
            retry: config.retry_policy(),
            session_config: config.session,
            metrics: Arc::new(SyncMetrics::default()),
            active: DashMap::new(),
            progress: DashMap::new(),
            results: DashMap::new(),
            merge_lock: Mutex::new(()),
        })
    }

    /// This device's id, as sent to peers.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Operational counters.
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Whether a session with `peer` is running, in either role.
    pub fn is_active(&self, peer: &PeerId) -> bool {
        self.active.contains_key(peer)
    }

    /// Result of the most recent session with `peer`.
    pub fn last_result(&self, peer: &PeerId) -> Option<SyncResult> {
        self.results.get(peer).map(|r| r.value().clone())
    }

    /// Watch phase and progress of sessions with `peer`.
    pub fn subscribe(&self, peer: &PeerId) -> watch::Receiver<SyncProgress> {
        self.progress
            .entry(peer.clone())
            .or_insert_with(|| watch::channel(SyncProgress::default()).0)
            .subscribe()
    }

    /// Request cancellation of the session with `peer`.
    ///
    /// Returns false if no session with `peer` is running.
    pub fn cancel_sync(&self, peer: &PeerId) -> bool {
        match self.active.get(peer) {
            Some(session) => {
                debug!(%peer, role = ?session.role, "cancellation requested");
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Sync with `peer` as initiator, retrying recoverable failures.
    ///
    /// In [`SyncMode::Incremental`] only records changed after `last_sync`
    /// are sent; without an explicit `last_sync` the peer's stored
    /// `last_sync_timestamp` is used, and a peer never synced with gets
    /// everything.
    pub async fn start_sync(
        &self,
        peer: &PeerId,
        mode: SyncMode,
        last_sync: Option<Timestamp>,
    ) -> Result<SyncResult, SyncError> {
        let cancel = CancelToken::new();
        let _guard = self.claim(peer, SessionRole::Initiator, cancel.clone())?;
        SyncMetrics::incr(&self.metrics.sessions_started);

        let mut run = SessionRun::new(peer.clone(), SessionRole::Initiator, cancel);
        self.publish(&run);
        let result = self.run_initiator(&mut run, mode, last_sync).await;
        self.conclude(run, result).await
    }

    /// Accept one incoming session and serve it as responder.
    ///
    /// A peer that fails verification is dropped without a log entry. A
    /// request from a peer we already have a session with is declined.
    pub async fn serve_next(&self) -> Result<SyncResult, SyncError> {
        let cancel = CancelToken::new();
        let mut session = self.session(cancel.clone());
        let peer = match session.accept().await {
            Ok(peer) => peer,
            Err(err) => {
                session.disconnect().await;
                warn!(error = %err, "incoming session failed before verification");
                return Err(err.into());
            }
        };

        let _guard = match self.claim(&peer, SessionRole::Responder, cancel.clone()) {
            Ok(guard) => guard,
            Err(err) => {
                self.decline(&mut session).await;
                return Err(err);
            }
        };
        SyncMetrics::incr(&self.metrics.sessions_started);
        SyncMetrics::incr(&self.metrics.attempts_total);

        let mut run = SessionRun::new(peer, SessionRole::Responder, cancel);
        run.attempts = 1;
        self.publish(&run);

        let exchanged = self.respond(&mut session, &mut run).await;
        session.disconnect().await;
        let result = match exchanged {
            Ok(exchange) => self.finalize(&mut run, exchange).await,
            Err(err) => Err(err),
        };
        self.conclude(run, result).await
    }

    fn claim(
        &self,
        peer: &PeerId,
        role: SessionRole,
        cancel: CancelToken,
    ) -> Result<ActiveGuard<'_>, SyncError> {
        match self.active.entry(peer.clone()) {
            Entry::Occupied(_) => Err(SyncError::SyncAlreadyInProgress(peer.clone())),
            Entry::Vacant(slot) => {
                slot.insert(ActiveSession { role, cancel });
                Ok(ActiveGuard {
                    active: &self.active,
                    peer: peer.clone(),
                })
            }
        }
    }

    fn session(&self, cancel: CancelToken) -> PeerSession<R> {
        PeerSession::new(
            Arc::clone(&self.radio),
            Arc::clone(&self.key),
            self.session_config.clone(),
            Arc::clone(&self.metrics),
            cancel,
        )
    }

    /// Move to `phase` and publish progress, unless cancelled.
    fn enter(&self, run: &mut SessionRun, phase: SyncPhase) -> Result<(), SyncError> {
        if run.cancel.is_cancelled() {
            return Err(SyncError::SyncCancelled);
        }
        match run.tracker.advance(phase) {
            Ok(_) => debug!(peer = %run.peer, %phase, "sync phase"),
            Err(err) => debug!(peer = %run.peer, error = %err, "phase change ignored"),
        }
        self.publish(run);
        Ok(())
    }

    fn publish(&self, run: &SessionRun) {
        let update = SyncProgress {
            phase: run.tracker.phase(),
            progress: run.tracker.progress(),
        };
        self.progress
            .entry(run.peer.clone())
            .or_insert_with(|| watch::channel(update).0)
            .send_replace(update);
    }

    async fn run_initiator(
        &self,
        run: &mut SessionRun,
        mode: SyncMode,
        last_sync: Option<Timestamp>,
    ) -> Result<Committed, SyncError> {
        let since = match (mode, last_sync) {
            (SyncMode::Full, _) => None,
            (SyncMode::Incremental, Some(at)) => Some(at),
            (SyncMode::Incremental, None) => self
                .repo
                .get_peer(&run.peer)
                .await?
                .and_then(|known| known.last_sync_timestamp),
        };

        self.enter(run, SyncPhase::Connecting)?;
        let mut attempt = 0;
        loop {
            run.attempts = attempt + 1;
            run.tally = Tally::default();
            SyncMetrics::incr(&self.metrics.attempts_total);

            let mut session = self.session(run.cancel.clone());
            let exchanged = self.initiate(&mut session, run, mode, since).await;
            session.disconnect().await;

            let err = match exchanged {
                Ok(exchange) => return self.finalize(run, exchange).await,
                Err(err) => err,
            };
            if !err.is_recoverable() {
                return Err(err);
            }
            if !self.retry.should_retry(attempt) {
                warn!(
                    peer = %run.peer,
                    attempts = run.attempts,
                    error = %err,
                    "sync attempts exhausted"
                );
                return Err(SyncError::MaxRetriesExceeded {
                    attempts: run.attempts,
                    last_error: Box::new(err),
                });
            }

            let delay = self.retry.delay_for(attempt);
            SyncMetrics::incr(&self.metrics.retries_total);
            debug!(peer = %run.peer, attempt = run.attempts, ?delay, error = %err, "retrying sync");
            tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(SyncError::SyncCancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(err) = run.tracker.retry() {
                debug!(peer = %run.peer, error = %err, "phase rewind ignored");
            }
            self.publish(run);
            attempt += 1;
        }
    }

    /// One initiator attempt: connect, request, send, receive.
    async fn initiate(
        &self,
        session: &mut PeerSession<R>,
        run: &mut SessionRun,
        mode: SyncMode,
        since: Option<Timestamp>,
    ) -> Result<Exchange, SyncError> {
        session.connect(&run.peer).await?;

        self.enter(run, SyncPhase::AwaitingHandshake)?;
        session
            .send_message(&Message::SyncRequest(SyncRequest {
                peer_id: self.device_id.clone(),
                device_name: self.device_name.clone(),
                sync_mode: mode,
                last_sync_timestamp: since,
                entity_kinds: vec![EntityKind::Events, EntityKind::History],
            }))
            .await?;
        let response = match session.recv_message().await? {
            Message::SyncResponse(response) => response,
            other => return Err(unexpected("SyncResponse", &other).into()),
        };
        run.peer_name = Some(response.device_name);
        if !response.accepted {
            return Err(SyncError::Rejected {
                reason: response
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }

        self.enter(run, SyncPhase::SendingLocalData)?;
        let local = self.read_local(since).await?;
        self.send_local(session, run, &local).await?;

        self.enter(run, SyncPhase::RequestingRemoteData)?;
        let (events, history) = self.receive_remote(session, run).await?;

        Ok(Exchange {
            device: response.device_id,
            events,
            history,
        })
    }

    /// Responder side: answer the request, receive, then send.
    async fn respond(
        &self,
        session: &mut PeerSession<R>,
        run: &mut SessionRun,
    ) -> Result<Exchange, SyncError> {
        self.enter(run, SyncPhase::AwaitingHandshake)?;
        let request = match session.recv_message().await? {
            Message::SyncRequest(request) => request,
            other => return Err(unexpected("SyncRequest", &other).into()),
        };
        run.peer_name = Some(request.device_name);
        let since = match request.sync_mode {
            SyncMode::Full => None,
            SyncMode::Incremental => request.last_sync_timestamp,
        };
        session
            .send_message(&Message::SyncResponse(SyncResponse {
                accepted: true,
                reason: None,
                device_id: self.device_id.clone(),
                device_name: self.device_name.clone(),
            }))
            .await?;

        self.enter(run, SyncPhase::RequestingRemoteData)?;
        let (events, history) = self.receive_remote(session, run).await?;
        let local = self.read_local(since).await?;
        self.send_local(session, run, &local).await?;

        Ok(Exchange {
            device: request.peer_id,
            events,
            history,
        })
    }

    /// Answer a request with `accepted: false`. Best effort.
    async fn decline(&self, session: &mut PeerSession<R>) {
        let peer = session.peer().cloned();
        match session.recv_message().await {
            Ok(Message::SyncRequest(_)) => {
                let response = Message::SyncResponse(SyncResponse {
                    accepted: false,
                    reason: Some(BUSY_REASON.to_string()),
                    device_id: self.device_id.clone(),
                    device_name: self.device_name.clone(),
                });
                if let Err(err) = session.send_message(&response).await {
                    debug!(?peer, error = %err, "could not decline sync request");
                }
            }
            Ok(other) => debug!(?peer, kind = other.kind(), "expected a sync request"),
            Err(err) => debug!(?peer, error = %err, "no sync request to decline"),
        }
        session.disconnect().await;
        info!(?peer, "declined sync request, session already running");
    }

    /// Records to send. An incremental read still carries the complete log
    /// of every event it sends.
    async fn read_local(&self, since: Option<Timestamp>) -> Result<LocalData, SyncError> {
        let events = self.repo.get_events(since).await?;
        let mut history = self.repo.get_history(None).await?;
        if let Some(since) = since {
            let sent: HashSet<EventId> = events.iter().map(|e| e.id).collect();
            history.retain(|e| e.timestamp > since || sent.contains(&e.event_id));
        }
        Ok(LocalData { events, history })
    }

    async fn send_local(
        &self,
        session: &mut PeerSession<R>,
        run: &mut SessionRun,
        local: &LocalData,
    ) -> Result<(), SyncError> {
        let events_count = local.events.len() as u32;
        let history_count = local.history.len() as u32;

        session
            .send_batch(EntityKind::Events, &encode_batch(&local.events)?)
            .await?;
        run.tally.events_sent = events_count;

        session
            .send_batch(EntityKind::History, &encode_batch(&local.history)?)
            .await?;
        run.tally.history_sent = history_count;

        session
            .send_message(&Message::SyncComplete(SyncComplete {
                events_count,
                history_count,
            }))
            .await?;
        Ok(())
    }

    async fn receive_remote(
        &self,
        session: &mut PeerSession<R>,
        run: &mut SessionRun,
    ) -> Result<(Vec<Event>, Vec<EditHistoryEntry>), SyncError> {
        let events = decode_events(&session.receive_batch(EntityKind::Events).await?)?;
        run.tally.events_received = events.len() as u32;

        let history = decode_history(&session.receive_batch(EntityKind::History).await?)?;
        run.tally.history_received = history.len() as u32;

        match session.recv_message().await? {
            Message::SyncComplete(done)
                if done.events_count as usize == events.len()
                    && done.history_count as usize == history.len() => {}
            Message::SyncComplete(done) => {
                return Err(ProtocolError::MalformedBatch(format!(
                    "peer announced {} events and {} history entries, received {} and {}",
                    done.events_count,
                    done.history_count,
                    events.len(),
                    history.len()
                ))
                .into());
            }
            other => return Err(unexpected("SyncComplete", &other).into()),
        }
        Ok((events, history))
    }

    /// Merge what the peer sent and commit it in one transaction.
    async fn finalize(
        &self,
        run: &mut SessionRun,
        exchange: Exchange,
    ) -> Result<Committed, SyncError> {
        self.enter(run, SyncPhase::ResolvingConflicts)?;
        let _merging = self.merge_lock.lock().await;
        let local_events = self.repo.get_events(None).await?;
        let local_history = self.repo.get_history(None).await?;
        let MergePlan {
            events,
            history,
            conflicts,
            severity,
            resolution,
        } = plan_merge(
            &local_events,
            &local_history,
            &exchange.events,
            &exchange.history,
            &self.merge_policy,
        );
        run.tally.conflicts = conflicts;
        run.tally.resolution = resolution;
        debug!(peer = %run.peer, conflicts, %severity, %resolution, "merge planned");

        self.enter(run, SyncPhase::Finalizing)?;
        let custom_name = self
            .repo
            .get_peer(&run.peer)
            .await?
            .and_then(|known| known.custom_name);
        let committed = Committed {
            events: events.len(),
            history: history.len(),
        };
        self.repo
            .commit(CommitBatch {
                events,
                history,
                peer: Some(PeerDevice {
                    id: exchange.device,
                    peer_identifier: run.peer.clone(),
                    custom_name,
                    last_sync_timestamp: Some(run.started),
                    is_local_device: false,
                }),
            })
            .await?;
        Ok(committed)
    }

    /// Settle the terminal phase, write the session log and record the result.
    async fn conclude(
        &self,
        mut run: SessionRun,
        result: Result<Committed, SyncError>,
    ) -> Result<SyncResult, SyncError> {
        let last_phase = run.tracker.phase();
        let terminal = if result.is_ok() {
            SyncPhase::Done
        } else {
            SyncPhase::Failed
        };
        if let Err(err) = run.tracker.advance(terminal) {
            debug!(peer = %run.peer, error = %err, "terminal phase change ignored");
        }

        let (outcome, details) = match &result {
            Ok(committed) => {
                SyncMetrics::incr(&self.metrics.sessions_completed);
                SyncMetrics::add(&self.metrics.conflicts_resolved, run.tally.conflicts as u64);
                info!(
                    peer = %run.peer,
                    role = ?run.role,
                    attempts = run.attempts,
                    events_received = run.tally.events_received,
                    conflicts = run.tally.conflicts,
                    "sync completed"
                );
                (
                    SessionOutcome::Completed,
                    format!(
                        "merged {} events, {} new history entries",
                        committed.events, committed.history
                    ),
                )
            }
            Err(SyncError::SyncCancelled) => {
                SyncMetrics::incr(&self.metrics.sessions_cancelled);
                info!(peer = %run.peer, role = ?run.role, phase = %last_phase, "sync cancelled");
                (
                    SessionOutcome::Cancelled,
                    format!("cancelled during {last_phase}"),
                )
            }
            Err(err) => {
                SyncMetrics::incr(&self.metrics.sessions_failed);
                warn!(peer = %run.peer, role = ?run.role, phase = %last_phase, error = %err, "sync failed");
                (SessionOutcome::Failed, format!("{err} during {last_phase}"))
            }
        };

        let entry = SyncLogEntry {
            id: uuid::Uuid::new_v4(),
            timestamp: Timestamp::now(),
            peer_identifier: run.peer.clone(),
            peer_name: run.peer_name.clone(),
            events_received: run.tally.events_received,
            events_sent: run.tally.events_sent,
            history_received: run.tally.history_received,
            history_sent: run.tally.history_sent,
            conflict_count: run.tally.conflicts,
            resolution_method: run.tally.resolution,
            outcome,
            details,
        };
        if let Err(err) = self.repo.append_sync_log(entry).await {
            warn!(peer = %run.peer, error = %err, "could not write sync log entry");
        }

        let summary = SyncResult {
            peer: run.peer.clone(),
            role: run.role,
            outcome,
            events_sent: run.tally.events_sent,
            events_received: run.tally.events_received,
            history_sent: run.tally.history_sent,
            history_received: run.tally.history_received,
            conflicts: run.tally.conflicts,
            resolution: run.tally.resolution,
            attempts: run.attempts,
            error: result.as_ref().err().map(ToString::to_string),
        };
        self.results.insert(run.peer.clone(), summary.clone());
        self.publish(&run);

        result.map(|_| summary)
    }
}
