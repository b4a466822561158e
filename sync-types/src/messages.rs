//! Protocol messages for pairsync.
//!
//! These are the bodies carried inside a version-prefixed frame; see
//! [`crate::frame`] for the byte layout.

use serde::{Deserialize, Serialize};

use crate::{DeviceId, Timestamp};

/// Length of handshake nonces and proofs in bytes.
pub const NONCE_LEN: usize = 32;

/// Length of a chunk payload digest in bytes (SHA-256).
pub const CHECKSUM_LEN: usize = 32;

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Liveness/identity challenge sent while verifying a connection
    Challenge(Challenge),
    /// Answer to a challenge
    ChallengeResponse(ChallengeResponse),
    /// Initiator asks to sync
    SyncRequest(SyncRequest),
    /// Responder accepts or declines
    SyncResponse(SyncResponse),
    /// One fragment of a serialized batch
    DataChunk(DataChunk),
    /// Chunk received and verified
    ChunkAck(ChunkAck),
    /// Chunk failed verification, send it again
    ChunkRetransmit(ChunkRetransmit),
    /// All batches of one side have been sent
    SyncComplete(SyncComplete),
    /// Peer aborts with an error
    ErrorMessage(ErrorMessage),
    /// Graceful disconnect
    Bye(Bye),
}

impl Message {
    /// Short name of the message kind, for logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Challenge(_) => "Challenge",
            Message::ChallengeResponse(_) => "ChallengeResponse",
            Message::SyncRequest(_) => "SyncRequest",
            Message::SyncResponse(_) => "SyncResponse",
            Message::DataChunk(_) => "DataChunk",
            Message::ChunkAck(_) => "ChunkAck",
            Message::ChunkRetransmit(_) => "ChunkRetransmit",
            Message::SyncComplete(_) => "SyncComplete",
            Message::ErrorMessage(_) => "ErrorMessage",
            Message::Bye(_) => "Bye",
        }
    }
}

/// Which kind of records a batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// `Event` records
    Events,
    /// `EditHistoryEntry` records
    History,
}

/// Whether to exchange everything or only changes since the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// All records.
    Full,
    /// Records changed since `last_sync_timestamp`.
    Incremental,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Random challenge sent by the verifying side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Fresh random nonce.
    pub nonce: [u8; NONCE_LEN],
}

/// Proof of possession of the pairing key for a received challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// MAC over the challenge nonce.
    pub proof: [u8; NONCE_LEN],
    /// Responder's own challenge, so verification is mutual.
    pub counter_challenge: Option<[u8; NONCE_LEN]>,
}

/// Request to start a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Initiating device.
    pub peer_id: DeviceId,
    /// Initiating device's display name.
    pub device_name: String,
    /// Full or incremental.
    pub sync_mode: SyncMode,
    /// For incremental syncs, when the two peers last synced.
    pub last_sync_timestamp: Option<Timestamp>,
    /// Record kinds to exchange.
    pub entity_kinds: Vec<EntityKind>,
}

/// Responder's answer to a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Whether the session goes ahead.
    pub accepted: bool,
    /// Why it was declined.
    pub reason: Option<String>,
    /// Responding device.
    pub device_id: DeviceId,
    /// Responding device's display name.
    pub device_name: String,
}

/// One bounded fragment of a serialized batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChunk {
    /// Record kind of the batch this chunk belongs to.
    pub entity_kind: EntityKind,
    /// Zero-based position of this chunk.
    pub sequence_number: u32,
    /// Number of chunks in the batch.
    pub total_chunks: u32,
    /// Fragment bytes.
    pub payload: Vec<u8>,
    /// SHA-256 of `payload`.
    pub payload_checksum: [u8; CHECKSUM_LEN],
}

/// Acknowledge a verified chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    /// Sequence number of the chunk.
    pub sequence_number: u32,
}

/// Ask the sender to transmit a chunk again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRetransmit {
    /// Sequence number of the rejected chunk.
    pub sequence_number: u32,
}

/// Marks the end of one side's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncComplete {
    /// Events sent.
    pub events_count: u32,
    /// History entries sent.
    pub history_count: u32,
}

/// Abort with an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Machine-readable code.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
}

/// Graceful disconnect message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bye {
    /// Optional reason for disconnect
    pub reason: Option<String>,
}
