//! Error types for the pairsync wire protocol.

use thiserror::Error;

use crate::EntityKind;

/// Errors raised while encoding, decoding, or validating protocol data.
///
/// Every variant is terminal for a session: a peer that speaks a different
/// version or sends data that cannot be verified is not retried.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid message type discriminator
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Frame carries a protocol version this build does not speak
    #[error("unsupported protocol version: {received} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the frame header.
        received: u8,
        /// Version this build speaks.
        supported: u8,
    },

    /// Frame too short or otherwise structurally broken
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Chunk payload does not match its digest
    #[error("checksum mismatch on chunk {sequence}")]
    ChecksumMismatch {
        /// Sequence number of the rejected chunk.
        sequence: u32,
    },

    /// Not every chunk of a batch arrived
    #[error("incomplete transfer: received {received} of {expected} chunks")]
    IncompleteTransfer {
        /// Chunks received.
        received: u32,
        /// Chunks announced by the sender.
        expected: u32,
    },

    /// Chunks of one batch disagree with each other
    #[error("inconsistent chunks: {0}")]
    InconsistentChunks(String),

    /// Batch decoded but contains invalid records
    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    /// Peer sent a message that is not valid at this point of the session
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// What the session was waiting for.
        expected: String,
        /// What actually arrived.
        actual: String,
    },

    /// Peer sent an entity kind other than the one being transferred
    #[error("unexpected entity kind: expected {expected:?}, got {actual:?}")]
    UnexpectedEntityKind {
        /// Kind being transferred.
        expected: EntityKind,
        /// Kind found in the chunk.
        actual: EntityKind,
    },

    /// Peer reported an error and aborted
    #[error("peer error {code}: {message}")]
    Remote {
        /// Error code sent by the peer.
        code: u16,
        /// Message sent by the peer.
        message: String,
    },
}
