//! Storage interface for the four pairsync record kinds.
//!
//! The sync core never owns data; it reads events and history from a
//! [`Repository`], and writes merged results back in one [`CommitBatch`].

mod memory;

pub use memory::MemoryRepository;

use async_trait::async_trait;
use pairsync_types::{EditHistoryEntry, Event, PeerDevice, PeerId, SyncLogEntry, Timestamp};

/// Repository errors.
///
/// All of these are terminal from the orchestrator's point of view.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A second device was marked as the local one.
    #[error("a local device is already registered: {existing}")]
    DuplicateLocalDevice {
        /// Peer identifier of the registered local device.
        existing: PeerId,
    },

    /// The transaction could not be applied; nothing was written.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Everything one successful session persists, applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    /// Merged events to insert or replace.
    pub events: Vec<Event>,
    /// History entries learned from the peer, in merged order.
    pub history: Vec<EditHistoryEntry>,
    /// Updated record for the peer.
    pub peer: Option<PeerDevice>,
}

impl CommitBatch {
    /// Whether the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.history.is_empty() && self.peer.is_none()
    }
}

/// Trait for record storage backends.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Events modified after `since` (all events when `None`).
    async fn get_events(&self, since: Option<Timestamp>) -> Result<Vec<Event>, RepositoryError>;

    /// Insert or replace events by id.
    async fn upsert_events(&self, events: &[Event]) -> Result<(), RepositoryError>;

    /// History entries stamped after `since` (all entries when `None`).
    async fn get_history(
        &self,
        since: Option<Timestamp>,
    ) -> Result<Vec<EditHistoryEntry>, RepositoryError>;

    /// Append history entries, skipping ids already stored.
    ///
    /// Returns the number of entries actually appended.
    async fn append_history(&self, entries: &[EditHistoryEntry]) -> Result<usize, RepositoryError>;

    /// Look up a peer by transport address.
    async fn get_peer(&self, peer: &PeerId) -> Result<Option<PeerDevice>, RepositoryError>;

    /// Insert or replace a peer record.
    async fn upsert_peer(&self, peer: PeerDevice) -> Result<(), RepositoryError>;

    /// Append one sync log entry.
    async fn append_sync_log(&self, entry: SyncLogEntry) -> Result<(), RepositoryError>;

    /// Apply a batch in one transaction: either all of it lands or none.
    async fn commit(&self, batch: CommitBatch) -> Result<(), RepositoryError>;

    /// Every sync log entry, oldest first.
    async fn sync_logs(&self) -> Result<Vec<SyncLogEntry>, RepositoryError>;

    /// The record describing this device, if registered.
    async fn local_device(&self) -> Result<Option<PeerDevice>, RepositoryError>;
}
