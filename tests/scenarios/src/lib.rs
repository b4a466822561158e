//! # scenario-tests
//!
//! End-to-end scenarios for pairsync.
//!
//! Peers run the real orchestrator, session and codec over an in-process
//! loopback radio, so every scenario exercises the full stack:
//! - Convergence of two or more devices after pairwise syncs
//! - Field-level conflicts and their deterministic resolution
//! - Link faults (dropped connects, corrupted chunks, severed links)
//! - Cancellation, failed commits and concurrent session attempts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod harness;

pub mod scenarios;
