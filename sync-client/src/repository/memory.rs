//! In-memory repository for tests, demos and embedding.

use super::{CommitBatch, Repository, RepositoryError};
use async_trait::async_trait;
use pairsync_types::{
    EditHistoryEntry, EntryId, Event, EventId, PeerDevice, PeerId, SyncLogEntry, Timestamp,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

/// In-memory repository.
///
/// Cloning shares the underlying store. Commits take the write lock once,
/// so a reader never observes half of a batch.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<RwLock<MemoryState>>,
    fail_next_commit: Arc<Mutex<Option<String>>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    events: BTreeMap<EventId, Event>,
    history: Vec<EditHistoryEntry>,
    history_ids: HashSet<EntryId>,
    peers: BTreeMap<PeerId, PeerDevice>,
    sync_logs: Vec<SyncLogEntry>,
    commits: u32,
}

impl MemoryState {
    fn check_local(&self, peer: &PeerDevice) -> Result<(), RepositoryError> {
        if !peer.is_local_device {
            return Ok(());
        }
        match self
            .peers
            .values()
            .find(|p| p.is_local_device && p.peer_identifier != peer.peer_identifier)
        {
            Some(existing) => Err(RepositoryError::DuplicateLocalDevice {
                existing: existing.peer_identifier.clone(),
            }),
            None => Ok(()),
        }
    }

    fn put_events(&mut self, events: &[Event]) {
        for event in events {
            self.events.insert(event.id, event.clone());
        }
    }

    fn put_history(&mut self, entries: &[EditHistoryEntry]) -> usize {
        let mut appended = 0;
        for entry in entries {
            if self.history_ids.insert(entry.id) {
                self.history.push(entry.clone());
                appended += 1;
            }
        }
        appended
    }
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with its local device registered.
    pub async fn with_local_device(device: PeerDevice) -> Result<Self, RepositoryError> {
        let repo = Self::new();
        repo.upsert_peer(PeerDevice {
            is_local_device: true,
            ..device
        })
        .await?;
        Ok(repo)
    }

    /// Record a local edit: store the event and append its history entry.
    pub async fn record_edit(&self, event: Event, entry: EditHistoryEntry) {
        let mut state = self.state.write().await;
        state.put_events(std::slice::from_ref(&event));
        state.put_history(std::slice::from_ref(&entry));
    }

    /// Look up one event.
    pub async fn event(&self, id: EventId) -> Option<Event> {
        self.state.read().await.events.get(&id).cloned()
    }

    /// Number of commits applied so far.
    pub async fn commit_count(&self) -> u32 {
        self.state.read().await.commits
    }

    /// Cause the next commit() to fail without writing anything.
    pub fn fail_next_commit(&self, reason: &str) {
        *self
            .fail_next_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    fn take_commit_failure(&self) -> Option<String> {
        self.fail_next_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_events(&self, since: Option<Timestamp>) -> Result<Vec<Event>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .values()
            .filter(|e| since.map_or(true, |t| e.last_modified_at > t))
            .cloned()
            .collect())
    }

    async fn upsert_events(&self, events: &[Event]) -> Result<(), RepositoryError> {
        self.state.write().await.put_events(events);
        Ok(())
    }

    async fn get_history(
        &self,
        since: Option<Timestamp>,
    ) -> Result<Vec<EditHistoryEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|e| since.map_or(true, |t| e.timestamp > t))
            .cloned()
            .collect())
    }

    async fn append_history(&self, entries: &[EditHistoryEntry]) -> Result<usize, RepositoryError> {
        Ok(self.state.write().await.put_history(entries))
    }

    async fn get_peer(&self, peer: &PeerId) -> Result<Option<PeerDevice>, RepositoryError> {
        Ok(self.state.read().await.peers.get(peer).cloned())
    }

    async fn upsert_peer(&self, peer: PeerDevice) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.check_local(&peer)?;
        state.peers.insert(peer.peer_identifier.clone(), peer);
        Ok(())
    }

    async fn append_sync_log(&self, entry: SyncLogEntry) -> Result<(), RepositoryError> {
        self.state.write().await.sync_logs.push(entry);
        Ok(())
    }

    async fn commit(&self, batch: CommitBatch) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;

        // Every check runs before the first write
        if let Some(reason) = self.take_commit_failure() {
            return Err(RepositoryError::CommitFailed(reason));
        }
        if let Some(peer) = &batch.peer {
            state.check_local(peer)?;
        }

        state.put_events(&batch.events);
        state.put_history(&batch.history);
        if let Some(peer) = batch.peer {
            state.peers.insert(peer.peer_identifier.clone(), peer);
        }
        state.commits += 1;
        Ok(())
    }

    async fn sync_logs(&self) -> Result<Vec<SyncLogEntry>, RepositoryError> {
        Ok(self.state.read().await.sync_logs.clone())
    }

    async fn local_device(&self) -> Result<Option<PeerDevice>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .peers
            .values()
            .find(|p| p.is_local_device)
            .cloned())
    }
}
