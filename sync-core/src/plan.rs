//! Applying a peer's batches to local state.
//!
//! [`plan_merge`] decides, without touching storage, which events must be
//! written and which history entries are new after receiving a peer's
//! batches. Both peers of a session run it with the roles swapped and end up
//! writing the same merged events.

use std::collections::{BTreeMap, HashMap, HashSet};

use pairsync_types::{EditHistoryEntry, EntryId, Event, EventId, ResolutionMethod};

use crate::base::reconstruct_base;
use crate::conflict::{resolve, MergePolicy, Severity};
use crate::history::merge_logs;

/// What a session must persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// New or changed events to upsert.
    pub events: Vec<Event>,
    /// History entries not yet stored locally, in merged order.
    pub history: Vec<EditHistoryEntry>,
    /// Events whose merge had at least one conflicting field.
    pub conflicts: u32,
    /// Worst severity among the merges.
    pub severity: Severity,
    /// Strongest resolution applied to any event.
    pub resolution: ResolutionMethod,
}

impl Default for MergePlan {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            history: Vec::new(),
            conflicts: 0,
            severity: Severity::None,
            resolution: ResolutionMethod::Unchanged,
        }
    }
}

impl MergePlan {
    /// Whether nothing needs to be written.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.history.is_empty()
    }
}

/// Merge received events and history into local state.
///
/// `local_history` must be the full local log and `remote_history` must hold
/// the peer's complete log of every event in `remote_events`; entries for
/// events not sent may be missing (incremental mode). Events are never
/// removed: a remote event unknown locally is simply added.
pub fn plan_merge(
    local_events: &[Event],
    local_history: &[EditHistoryEntry],
    remote_events: &[Event],
    remote_history: &[EditHistoryEntry],
    policy: &MergePolicy,
) -> MergePlan {
    let local_by_id: HashMap<EventId, &Event> = local_events.iter().map(|e| (e.id, e)).collect();

    // A repeated id in one batch keeps the most recently modified copy
    let mut incoming: BTreeMap<EventId, &Event> = BTreeMap::new();
    for event in remote_events {
        incoming
            .entry(event.id)
            .and_modify(|kept| {
                if event.last_modified_at > kept.last_modified_at {
                    *kept = event;
                }
            })
            .or_insert(event);
    }

    let mut plan = MergePlan::default();
    for (id, remote) in incoming {
        let Some(local) = local_by_id.get(&id) else {
            plan.events.push(remote.clone());
            plan.resolution = plan.resolution.max(ResolutionMethod::TookRemote);
            continue;
        };
        if *local == remote {
            continue;
        }

        let base = reconstruct_base(local, remote, local_history, remote_history);
        let outcome = resolve(&base, local, remote, policy);
        if outcome.report.has_conflicts() {
            plan.conflicts += 1;
        }
        plan.severity = plan.severity.max(outcome.report.severity);
        plan.resolution = plan.resolution.max(outcome.report.resolution);
        if outcome.merged != **local {
            plan.events.push(outcome.merged);
        }
    }

    let known: HashSet<EntryId> = local_history.iter().map(|e| e.id).collect();
    plan.history = merge_logs(local_history, remote_history)
        .into_iter()
        .filter(|e| !known.contains(&e.id))
        .collect();

    plan
}
