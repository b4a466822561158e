//! Error types for pairsync sessions and the orchestrator.
//!
//! Recoverable failures (timeouts, lost links, short transfers) may be retried
//! by the orchestrator; everything else ends the sync immediately.

use std::time::Duration;

use pairsync_types::{PeerId, ProtocolError};

use crate::crypto::CryptoError;
use crate::repository::RepositoryError;
use crate::transport::TransportError;

/// Errors raised by a single peer session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Radio failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Codec or protocol violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key or nonce generation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The radio connect did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The peer did not answer in time.
    #[error("receive timed out after {0:?}")]
    ReceiveTimeout(Duration),

    /// The peer failed the pairing handshake.
    #[error("security verification failed: {0}")]
    SecurityVerificationFailed(String),

    /// A batch stopped arriving part-way through.
    #[error("incomplete transfer: {received} of {expected} chunks")]
    IncompleteTransfer {
        /// Chunks received.
        received: u32,
        /// Chunks announced.
        expected: u32,
    },

    /// A chunk kept failing its checksum.
    #[error("checksum mismatch on chunk {sequence} after {attempts} retransmissions")]
    RetransmitBudgetExhausted {
        /// Offending chunk.
        sequence: u32,
        /// Retransmissions made.
        attempts: u32,
    },

    /// Cancelled by the application.
    #[error("session cancelled")]
    Cancelled,

    /// No live link.
    #[error("not connected")]
    NotConnected,
}

impl SessionError {
    /// Whether a fresh attempt might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_)
                | SessionError::ConnectTimeout(_)
                | SessionError::ReceiveTimeout(_)
                | SessionError::IncompleteTransfer { .. }
        )
    }
}

/// Errors returned by the sync orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Session failure.
    #[error("session error: {0}")]
    Session(SessionError),

    /// Persisting the merge failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Received data could not be used.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer declined the sync request.
    #[error("sync rejected by peer: {reason}")]
    Rejected {
        /// Reason given by the peer.
        reason: String,
    },

    /// A session with this peer is already running.
    #[error("sync already in progress with {0}")]
    SyncAlreadyInProgress(PeerId),

    /// Cancelled by the application.
    #[error("sync cancelled")]
    SyncCancelled,

    /// Every attempt failed with a recoverable error.
    #[error("gave up after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: Box<SyncError>,
    },
}

impl SyncError {
    /// Whether a fresh attempt might succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Session(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

impl From<SessionError> for SyncError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Cancelled => SyncError::SyncCancelled,
            other => SyncError::Session(other),
        }
    }
}
