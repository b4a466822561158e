//! Receive-side chunk buffer for pairsync.
//!
//! This module collects the chunks of one batch as they arrive:
//! - Verifies each chunk's digest and asks for a retransmit on mismatch
//! - Ignores duplicates (a retransmitted chunk whose ack was lost)
//! - Rejects chunks that disagree with the batch's kind or size
//!
//! The buffer is used by sync-client while receiving a batch; once every
//! sequence number is present, [`ChunkBuffer::finish`] yields the bytes.

use std::collections::BTreeMap;

use pairsync_types::{reassemble, DataChunk, EntityKind, ProtocolError};

/// What the receiver should answer for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkVerdict {
    /// Verified and stored; ack it.
    Accepted {
        /// All chunks of the batch are now present.
        complete: bool,
    },
    /// Already stored; ack it again.
    Duplicate,
    /// Digest mismatch; request retransmission.
    Retransmit,
}

/// Chunks of one batch, keyed by sequence number.
#[derive(Debug)]
pub struct ChunkBuffer {
    /// Kind of batch being received.
    kind: EntityKind,
    /// Announced by the first chunk.
    total: Option<u32>,
    /// Verified chunks.
    chunks: BTreeMap<u32, DataChunk>,
}

impl ChunkBuffer {
    /// Create an empty buffer for a batch of `kind`.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            total: None,
            chunks: BTreeMap::new(),
        }
    }

    /// Offer an incoming chunk.
    ///
    /// A chunk of the wrong kind, with a different `total_chunks`, or with an
    /// out-of-range sequence number is a protocol error.
    pub fn accept(&mut self, chunk: DataChunk) -> Result<ChunkVerdict, ProtocolError> {
        if chunk.entity_kind != self.kind {
            return Err(ProtocolError::UnexpectedEntityKind {
                expected: self.kind,
                actual: chunk.entity_kind,
            });
        }

        let total = *self.total.get_or_insert(chunk.total_chunks);
        if chunk.total_chunks != total || total == 0 {
            return Err(ProtocolError::InconsistentChunks(format!(
                "chunk {} announces {} chunks, expected {}",
                chunk.sequence_number, chunk.total_chunks, total
            )));
        }
        if chunk.sequence_number >= total {
            return Err(ProtocolError::InconsistentChunks(format!(
                "sequence number {} out of range for {} chunks",
                chunk.sequence_number, total
            )));
        }

        if chunk.verify().is_err() {
            return Ok(ChunkVerdict::Retransmit);
        }
        if self.chunks.contains_key(&chunk.sequence_number) {
            return Ok(ChunkVerdict::Duplicate);
        }

        self.chunks.insert(chunk.sequence_number, chunk);
        Ok(ChunkVerdict::Accepted {
            complete: self.is_complete(),
        })
    }

    /// Whether every announced chunk is present.
    pub fn is_complete(&self) -> bool {
        self.total
            .is_some_and(|total| self.chunks.len() as u32 == total)
    }

    /// Sequence numbers not yet received.
    pub fn missing(&self) -> Vec<u32> {
        match self.total {
            Some(total) => (0..total)
                .filter(|seq| !self.chunks.contains_key(seq))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of verified chunks held.
    pub fn received(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Total announced by the sender, once known.
    pub fn expected(&self) -> Option<u32> {
        self.total
    }

    /// Reassemble the batch bytes.
    pub fn finish(self) -> Result<Vec<u8>, ProtocolError> {
        if !self.is_complete() {
            return Err(ProtocolError::IncompleteTransfer {
                received: self.received(),
                expected: self.total.unwrap_or(1),
            });
        }
        let chunks: Vec<DataChunk> = self.chunks.into_values().collect();
        reassemble(&chunks)
    }
}
