//! Session transport state machine for pairsync.
//!
//! This module provides a pure, side-effect-free state machine for one
//! point-to-point session. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (radio connect, framed send/receive) is performed by
//! sync-client, not by this module.

use pairsync_types::PeerId;

/// Session transport state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportState {
    /// No link.
    #[default]
    Idle,
    /// Radio connect in progress.
    Connecting {
        /// Peer being connected to.
        peer: PeerId,
    },
    /// Link up, challenge/response in progress.
    Verifying {
        /// Peer being verified.
        peer: PeerId,
    },
    /// Verified and ready to exchange messages.
    Connected {
        /// Verified peer.
        peer: PeerId,
    },
    /// Chunked data transfer in progress.
    Transferring {
        /// Peer on the other end.
        peer: PeerId,
    },
    /// Tearing the link down.
    Disconnecting,
    /// Session failed; must be disconnected before reuse.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl TransportState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: TransportEvent) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Idle
            (Self::Idle, TransportEvent::ConnectRequested { peer }) => (
                Self::Connecting { peer: peer.clone() },
                vec![Action::Connect { peer }],
            ),
            (Self::Idle, TransportEvent::IncomingAccepted { peer }) => (
                Self::Verifying { peer },
                vec![Action::AnswerChallenge],
            ),

            // From Connecting
            (Self::Connecting { peer }, TransportEvent::ConnectSucceeded) => (
                Self::Verifying { peer },
                vec![Action::SendChallenge],
            ),
            (Self::Connecting { .. }, TransportEvent::ConnectFailed { error }) => (
                Self::Failed {
                    reason: error.clone(),
                },
                vec![Action::EmitEvent(SessionEvent::ConnectionFailed { error })],
            ),

            // From Verifying
            (Self::Verifying { peer }, TransportEvent::VerificationSucceeded) => (
                Self::Connected { peer: peer.clone() },
                vec![Action::EmitEvent(SessionEvent::Verified { peer })],
            ),
            (Self::Verifying { peer }, TransportEvent::VerificationFailed { error }) => (
                Self::Failed {
                    reason: error.clone(),
                },
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(SessionEvent::VerificationFailed { peer, error }),
                ],
            ),

            // From Connected
            (Self::Connected { peer }, TransportEvent::ChunkExchanged) => {
                (Self::Transferring { peer }, vec![])
            }

            // From Transferring
            (Self::Transferring { peer }, TransportEvent::ChunkExchanged) => {
                (Self::Transferring { peer }, vec![])
            }
            (Self::Transferring { peer }, TransportEvent::TransferFinished) => {
                (Self::Connected { peer }, vec![])
            }
            (Self::Transferring { peer }, TransportEvent::TransferFailed { error }) => (
                Self::Failed {
                    reason: error.clone(),
                },
                vec![Action::EmitEvent(SessionEvent::TransferFailed { peer, error })],
            ),

            // Link loss from any live state
            (
                Self::Connecting { peer }
                | Self::Verifying { peer }
                | Self::Connected { peer }
                | Self::Transferring { peer },
                TransportEvent::ChannelLost { reason },
            ) => (
                Self::Failed {
                    reason: reason.clone(),
                },
                vec![Action::EmitEvent(SessionEvent::ChannelLost { peer, reason })],
            ),

            // Disconnect from any non-Idle state
            (Self::Connected { .. } | Self::Transferring { .. }, TransportEvent::DisconnectRequested) => {
                (Self::Disconnecting, vec![Action::SendBye, Action::Disconnect])
            }
            (
                Self::Connecting { .. } | Self::Verifying { .. } | Self::Failed { .. },
                TransportEvent::DisconnectRequested,
            ) => (Self::Disconnecting, vec![Action::Disconnect]),
            (Self::Disconnecting, TransportEvent::LinkClosed) => {
                (Self::Idle, vec![Action::EmitEvent(SessionEvent::Closed)])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the session is verified and usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Transferring { .. })
    }

    /// Check if a connect or verification is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Verifying { .. })
    }

    /// Check if the session has failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Peer this session is bound to, if any.
    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            Self::Connecting { peer }
            | Self::Verifying { peer }
            | Self::Connected { peer }
            | Self::Transferring { peer } => Some(peer),
            _ => None,
        }
    }

    /// Short state name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Verifying { .. } => "verifying",
            Self::Connected { .. } => "connected",
            Self::Transferring { .. } => "transferring",
            Self::Disconnecting => "disconnecting",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Events that can occur in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Caller asked to connect to a peer.
    ConnectRequested {
        /// Target peer.
        peer: PeerId,
    },
    /// Radio accepted an incoming connection.
    IncomingAccepted {
        /// Connecting peer.
        peer: PeerId,
    },
    /// Radio connect succeeded.
    ConnectSucceeded,
    /// Radio connect failed or timed out.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Challenge/response completed.
    VerificationSucceeded,
    /// Challenge/response failed or timed out.
    VerificationFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// A data chunk was sent or received.
    ChunkExchanged,
    /// All chunks of a batch were exchanged.
    TransferFinished,
    /// Chunked transfer could not complete.
    TransferFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Radio reported the link gone.
    ChannelLost {
        /// Reason for the loss.
        reason: String,
    },
    /// Caller asked to disconnect.
    DisconnectRequested,
    /// Radio link closed.
    LinkClosed,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Initiate radio connection.
    Connect {
        /// Target peer.
        peer: PeerId,
    },
    /// Send our challenge and verify the answer (initiator side).
    SendChallenge,
    /// Wait for the peer's challenge and answer it (responder side).
    AnswerChallenge,
    /// Send a Bye message before disconnecting.
    SendBye,
    /// Tear down the radio link.
    Disconnect,
    /// Emit an event to the layer above.
    EmitEvent(SessionEvent),
}

/// Events emitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Peer verified.
    Verified {
        /// Verified peer.
        peer: PeerId,
    },
    /// Radio connect failed.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Challenge/response failed.
    VerificationFailed {
        /// Peer that failed verification.
        peer: PeerId,
        /// Error message describing the failure.
        error: String,
    },
    /// Chunked transfer failed.
    TransferFailed {
        /// Peer on the other end.
        peer: PeerId,
        /// Error message describing the failure.
        error: String,
    },
    /// Link lost while live.
    ChannelLost {
        /// Peer on the other end.
        peer: PeerId,
        /// Reason for the loss.
        reason: String,
    },
    /// Session back to Idle.
    Closed,
}
