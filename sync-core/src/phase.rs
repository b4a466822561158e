//! Orchestrator phase machine and progress tracking.
//!
//! Phases only move forward within a session. A retry rewinds the phase to
//! [`SyncPhase::Connecting`] but never the reported progress.

/// Phase of one sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// Nothing started yet.
    #[default]
    NotConnected,
    /// Opening the radio link.
    Connecting,
    /// Verifying the peer and exchanging SyncRequest/SyncResponse.
    AwaitingHandshake,
    /// Sending local batches.
    SendingLocalData,
    /// Receiving the peer's batches.
    RequestingRemoteData,
    /// Merging events and history.
    ResolvingConflicts,
    /// Committing and writing the session log.
    Finalizing,
    /// Session completed.
    Done,
    /// Session failed or was cancelled.
    Failed,
}

impl SyncPhase {
    /// Progress value reported when this phase is entered.
    pub fn progress(&self) -> f32 {
        match self {
            SyncPhase::NotConnected => 0.0,
            SyncPhase::Connecting => 0.1,
            SyncPhase::AwaitingHandshake => 0.2,
            SyncPhase::SendingLocalData => 0.35,
            SyncPhase::RequestingRemoteData => 0.6,
            SyncPhase::ResolvingConflicts => 0.8,
            SyncPhase::Finalizing => 0.9,
            SyncPhase::Done | SyncPhase::Failed => 1.0,
        }
    }

    /// Whether the session is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Done | SyncPhase::Failed)
    }

    fn ordinal(&self) -> u8 {
        match self {
            SyncPhase::NotConnected => 0,
            SyncPhase::Connecting => 1,
            SyncPhase::AwaitingHandshake => 2,
            SyncPhase::SendingLocalData => 3,
            SyncPhase::RequestingRemoteData => 4,
            SyncPhase::ResolvingConflicts => 5,
            SyncPhase::Finalizing => 6,
            SyncPhase::Done => 7,
            SyncPhase::Failed => 8,
        }
    }

    /// Short phase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncPhase::NotConnected => "not-connected",
            SyncPhase::Connecting => "connecting",
            SyncPhase::AwaitingHandshake => "awaiting-handshake",
            SyncPhase::SendingLocalData => "sending-local-data",
            SyncPhase::RequestingRemoteData => "requesting-remote-data",
            SyncPhase::ResolvingConflicts => "resolving-conflicts",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejected phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    /// Phase the tracker was in.
    pub from: SyncPhase,
    /// Phase that was requested.
    pub to: SyncPhase,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid phase transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Current phase plus the monotonic progress value of one session.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseTracker {
    phase: SyncPhase,
    progress: f32,
}

impl PhaseTracker {
    /// Fresh tracker at `NotConnected`, progress 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Current progress, 0.0..=1.0.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Move forward to `to` and return the new progress.
    ///
    /// Phases may be skipped (the responder never enters `Connecting`) but
    /// never revisited. `Failed` is reachable from any non-terminal phase.
    pub fn advance(&mut self, to: SyncPhase) -> Result<f32, InvalidTransition> {
        let allowed = !self.phase.is_terminal()
            && (to == SyncPhase::Failed || to.ordinal() > self.phase.ordinal());
        if !allowed {
            return Err(InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        self.progress = self.progress.max(to.progress());
        Ok(self.progress)
    }

    /// Rewind to `Connecting` for another attempt, keeping progress.
    pub fn retry(&mut self) -> Result<f32, InvalidTransition> {
        if self.phase.is_terminal() {
            return Err(InvalidTransition {
                from: self.phase,
                to: SyncPhase::Connecting,
            });
        }
        self.phase = SyncPhase::Connecting;
        self.progress = self.progress.max(SyncPhase::Connecting.progress());
        Ok(self.progress)
    }
}
