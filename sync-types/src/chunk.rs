//! Chunking, integrity digests and batch encoding.
//!
//! A batch of records is serialized once with MessagePack, then split into
//! chunks of at most [`MAX_CHUNK_PAYLOAD`] bytes. Every chunk carries a
//! SHA-256 digest of its own payload so a corrupted chunk can be re-requested
//! without resending the whole batch.

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use crate::messages::{DataChunk, EntityKind, CHECKSUM_LEN};
use crate::records::{EditHistoryEntry, Event};
use crate::ProtocolError;

/// Maximum payload bytes carried by a single chunk.
pub const MAX_CHUNK_PAYLOAD: usize = 512;

/// SHA-256 digest of a chunk payload.
pub fn payload_checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest);
    out
}

impl DataChunk {
    /// Build a chunk and compute its digest.
    pub fn new(
        entity_kind: EntityKind,
        sequence_number: u32,
        total_chunks: u32,
        payload: Vec<u8>,
    ) -> Self {
        let payload_checksum = payload_checksum(&payload);
        Self {
            entity_kind,
            sequence_number,
            total_chunks,
            payload,
            payload_checksum,
        }
    }

    /// Check the payload against its digest.
    pub fn verify(&self) -> Result<(), ProtocolError> {
        if payload_checksum(&self.payload) == self.payload_checksum {
            Ok(())
        } else {
            Err(ProtocolError::ChecksumMismatch {
                sequence: self.sequence_number,
            })
        }
    }
}

/// Split serialized batch bytes into ordered chunks.
///
/// An empty input yields exactly one empty chunk, so the receiver always has
/// a `total_chunks` to wait for.
pub fn split_into_chunks(entity_kind: EntityKind, bytes: &[u8]) -> Vec<DataChunk> {
    if bytes.is_empty() {
        return vec![DataChunk::new(entity_kind, 0, 1, Vec::new())];
    }

    let total = bytes.len().div_ceil(MAX_CHUNK_PAYLOAD) as u32;
    bytes
        .chunks(MAX_CHUNK_PAYLOAD)
        .enumerate()
        .map(|(i, part)| DataChunk::new(entity_kind, i as u32, total, part.to_vec()))
        .collect()
}

/// Concatenate chunk payloads in sequence order.
///
/// Input may be in any order and may contain duplicates of the same
/// sequence number (retransmissions); the last verified copy wins.
pub fn reassemble(chunks: &[DataChunk]) -> Result<Vec<u8>, ProtocolError> {
    let first = chunks.first().ok_or(ProtocolError::IncompleteTransfer {
        received: 0,
        expected: 1,
    })?;
    let total = first.total_chunks;
    let kind = first.entity_kind;

    if total == 0 {
        return Err(ProtocolError::InconsistentChunks(
            "total_chunks is zero".into(),
        ));
    }

    let mut slots: Vec<Option<&DataChunk>> = vec![None; total as usize];
    for chunk in chunks {
        if chunk.total_chunks != total {
            return Err(ProtocolError::InconsistentChunks(format!(
                "chunk {} announces {} chunks, expected {}",
                chunk.sequence_number, chunk.total_chunks, total
            )));
        }
        if chunk.entity_kind != kind {
            return Err(ProtocolError::InconsistentChunks(format!(
                "chunk {} carries {:?}, expected {:?}",
                chunk.sequence_number, chunk.entity_kind, kind
            )));
        }
        if chunk.sequence_number >= total {
            return Err(ProtocolError::InconsistentChunks(format!(
                "sequence number {} out of range for {} chunks",
                chunk.sequence_number, total
            )));
        }
        chunk.verify()?;
        slots[chunk.sequence_number as usize] = Some(chunk);
    }

    let received = slots.iter().filter(|s| s.is_some()).count() as u32;
    if received != total {
        return Err(ProtocolError::IncompleteTransfer {
            received,
            expected: total,
        });
    }

    let mut out = Vec::with_capacity(total as usize * MAX_CHUNK_PAYLOAD);
    for chunk in slots.into_iter().flatten() {
        out.extend_from_slice(&chunk.payload);
    }
    Ok(out)
}

/// Serialize a batch of records.
pub fn encode_batch<T: Serialize>(records: &[T]) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec(records).map_err(ProtocolError::Serialization)
}

/// Deserialize a batch of records.
pub fn decode_batch<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, ProtocolError> {
    rmp_serde::from_slice(bytes).map_err(ProtocolError::Deserialization)
}

/// Deserialize and validate a batch of events.
pub fn decode_events(bytes: &[u8]) -> Result<Vec<Event>, ProtocolError> {
    let events: Vec<Event> = decode_batch(bytes)?;
    for event in &events {
        event.validate()?;
    }
    Ok(events)
}

/// Deserialize a batch of history entries.
pub fn decode_history(bytes: &[u8]) -> Result<Vec<EditHistoryEntry>, ProtocolError> {
    decode_batch(bytes)
}
