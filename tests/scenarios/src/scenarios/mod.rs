//! Sync scenarios for pairsync.
//!
//! Organized by category:
//!
//! - `convergence` - C-CONV-*, C-CONF-*, C-INC-* - Merged state after pairwise syncs
//! - `faults` - F-LINK-*, F-SEC-*, F-PROTO-* - Degraded links and hostile peers
//! - `sessions` - S-CONC-*, S-CANCEL-*, S-COMMIT-* - Session lifecycle edge cases
//!
//! All scenarios run in-process over the loopback radio; none needs a
//! network or external services.

pub mod convergence;
pub mod faults;
pub mod sessions;
