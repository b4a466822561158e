//! Radio transport abstraction for pairsync.
//!
//! This module provides a pluggable point-to-point link layer that abstracts
//! the underlying short-range radio (discovery and advertising happen
//! elsewhere).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` opens a link to a peer and returns a handle
//! - `accept()` waits for a peer to open a link to us
//! - `send()` / `receive()` move whole frames over a link
//! - `disconnect()` tears a link down
//! - `subscribe()` reports links coming and going out of band
//!
//! # Example
//!
//! ```ignore
//! let radio = MockRadio::new();
//! let handle = radio.connect(&PeerId::new("radio:tablet")).await?;
//! radio.send(handle, &frame).await?;
//! let reply = radio.receive(handle).await?;
//! ```

mod loopback;
mod mock;

pub use loopback::{LoopbackNetwork, LoopbackRadio};
pub use mock::MockRadio;

use async_trait::async_trait;
use pairsync_types::PeerId;
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of the out-of-band radio event channel.
pub const RADIO_EVENT_CAPACITY: usize = 64;

/// Transport errors.
///
/// All of these are recoverable from the orchestrator's point of view.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// No peer with this address is reachable.
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Handle does not refer to a live link.
    #[error("not connected")]
    NotConnected,

    /// Link dropped while in use.
    #[error("channel lost: {0}")]
    ChannelLost(String),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Radio operation timed out.
    #[error("radio timeout")]
    Timeout,
}

/// Opaque identifier of one live link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Wrap a raw link number.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw link number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Out-of-band link events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A link came up.
    Connected {
        /// Link handle.
        handle: ConnectionHandle,
        /// Peer on the other end.
        peer: PeerId,
    },
    /// A link went down.
    Disconnected {
        /// Link handle.
        handle: ConnectionHandle,
        /// Peer on the other end.
        peer: PeerId,
    },
}

/// Point-to-point radio used by sessions.
///
/// Implementations handle the underlying link mechanism
/// (short-range radio, in-process loopback, mock).
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Open a link to `peer`.
    async fn connect(&self, peer: &PeerId) -> Result<ConnectionHandle, TransportError>;

    /// Wait for the next incoming link.
    async fn accept(&self) -> Result<(ConnectionHandle, PeerId), TransportError>;

    /// Send one frame over a link.
    async fn send(&self, handle: ConnectionHandle, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next frame from a link.
    ///
    /// Waits until data is available or the link closes.
    async fn receive(&self, handle: ConnectionHandle) -> Result<Vec<u8>, TransportError>;

    /// Close a link.
    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    /// Subscribe to out-of-band link events.
    fn subscribe(&self) -> broadcast::Receiver<RadioEvent>;
}
