//! # sync-client
//!
//! Peer-to-peer sync sessions for pairsync.
//!
//! This is the library applications use to sync their calendar data with a
//! paired device over a short-range radio.
//!
//! ## Features
//!
//! - **Mutual Pairing Proof**: HMAC-SHA256 challenge/response over a key
//!   derived with Argon2id + HKDF
//! - **Chunked Transfer**: stop-and-wait chunks with per-chunk digests and
//!   bounded retransmission
//! - **Transport Abstraction**: pluggable radio layer (loopback, mock)
//! - **Pure State Machines**: uses sync-core for side-effect-free logic
//! - **Atomic Commits**: one repository transaction per session
//!
//! ## Example
//!
//! ```ignore
//! use pairsync_client::{LoopbackNetwork, MemoryRepository, PairingKey, SyncConfig, SyncOrchestrator};
//!
//! let net = LoopbackNetwork::new();
//! let radio = Arc::new(net.radio("radio:phone"));
//! let repo = Arc::new(MemoryRepository::new());
//! let key = PairingKey::from_passphrase("correct horse", Argon2Params::default())?;
//! let orchestrator = SyncOrchestrator::new(radio, repo, key, SyncConfig::default())?;
//!
//! let result = orchestrator
//!     .start_sync(&PeerId::new("radio:tablet"), SyncMode::Full, None)
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod repository;
pub mod session;
pub mod transport;

pub use config::{ConfigError, DeviceConfig, MergeConfig, RetryConfig, SessionConfig, SyncConfig};
pub use crypto::{
    fresh_nonce, Argon2Params, CryptoError, PairingKey, PairingSecret, ProofRole, KEY_SIZE,
};
pub use error::{SessionError, SyncError};
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use orchestrator::{SessionRole, SyncOrchestrator, SyncProgress, SyncResult, BUSY_REASON};
pub use repository::{CommitBatch, MemoryRepository, Repository, RepositoryError};
pub use session::{CancelToken, PeerSession, ERR_UNAUTHORIZED, ERR_UNSUPPORTED_VERSION};
pub use transport::{
    ConnectionHandle, LoopbackNetwork, LoopbackRadio, MockRadio, RadioEvent, RadioTransport,
    TransportError,
};
