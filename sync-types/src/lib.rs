//! # sync-types
//!
//! Data model and wire codec for pairsync.
//!
//! This crate provides the foundational types used across all pairsync crates:
//! - [`Event`], [`EditHistoryEntry`], [`PeerDevice`], [`SyncLogEntry`] - Records
//! - [`DeviceId`], [`PeerId`], [`EventId`], [`EntryId`], [`Timestamp`] - Identity and ordering types
//! - [`Message`] - Protocol messages, framed with a version prefix
//! - [`split_into_chunks`] / [`reassemble`] - Chunking with per-chunk digests
//! - [`ProtocolError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod chunk;
mod error;
mod frame;
mod ids;
mod messages;
mod records;

pub use chunk::{
    decode_batch, decode_events, decode_history, encode_batch, payload_checksum, reassemble,
    split_into_chunks, MAX_CHUNK_PAYLOAD,
};
pub use error::ProtocolError;
pub use frame::{MessageType, HEADER_LEN, PROTOCOL_VERSION};
pub use ids::{DeviceId, EntryId, EventId, PeerId, Timestamp};
pub use messages::{
    Bye, Challenge, ChallengeResponse, ChunkAck, ChunkRetransmit, DataChunk, EntityKind,
    ErrorMessage, Message, SyncComplete, SyncMode, SyncRequest, SyncResponse, CHECKSUM_LEN,
    NONCE_LEN,
};
pub use records::{
    ChangeKind, EditHistoryEntry, Event, EventField, FieldValue, PeerDevice, ResolutionMethod,
    SessionOutcome, SyncLogEntry,
};
