//! # sync-core
//!
//! Pure logic for pairsync (no I/O, instant tests).
//!
//! This crate implements the state machines and merge algorithms for sync
//! without any radio or storage I/O:
//! - [`state`] - session transport state machine
//! - [`phase`] - orchestrator phases and monotonic progress
//! - [`conflict`] - three-way field merge of events
//! - [`base`] - common ancestor reconstruction from history
//! - [`history`] - causal merge of edit logs
//! - [`plan`] - what to persist after receiving a peer's batches
//! - [`buffer`] - receive-side chunk collection
//! - [`retry`] - backoff schedule
//!
//! The actual I/O (radio, repository) is performed by `sync-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod base;
pub mod buffer;
pub mod conflict;
pub mod history;
pub mod phase;
pub mod plan;
pub mod retry;
pub mod state;

pub use base::reconstruct_base;
pub use buffer::{ChunkBuffer, ChunkVerdict};
pub use conflict::{
    merge_text, resolve, EventBase, MergeOutcome, MergePolicy, MergeReport, Severity,
};
pub use history::{
    depends_on, entry_order, is_tombstoned, merge_event_logs, merge_logs, shared_entry_ids,
};
pub use phase::{InvalidTransition, PhaseTracker, SyncPhase};
pub use plan::{plan_merge, MergePlan};
pub use retry::RetryPolicy;
pub use state::{Action, SessionEvent, TransportEvent, TransportState};
