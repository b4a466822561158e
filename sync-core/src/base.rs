//! Reconstruction of the common ancestor of two event copies.
//!
//! The repository keeps no snapshots, so the base for a three-way merge is
//! rebuilt from edit history. Both peers feed the same two logs in, so both
//! arrive at the same base. Fields the logs cannot account for are left
//! unknown rather than guessed.

use std::collections::HashSet;

use pairsync_types::{EditHistoryEntry, EntryId, Event, EventField, FieldValue};

use crate::conflict::EventBase;
use crate::history::{merge_logs, shared_entry_ids};

/// Rebuild the last common state of `local` and `remote`.
///
/// Both logs must hold every entry their side has for the event. Entries for
/// other events are ignored.
///
/// If only one side has entries the other lacks, the other copy is still the
/// common state and every field of it is known. Otherwise title, location and
/// day come from the entries, and month and color stay unknown because
/// history does not record them.
pub fn reconstruct_base(
    local: &Event,
    remote: &Event,
    local_log: &[EditHistoryEntry],
    remote_log: &[EditHistoryEntry],
) -> EventBase {
    let local_entries: Vec<EditHistoryEntry> = local_log
        .iter()
        .filter(|e| e.event_id == local.id)
        .cloned()
        .collect();
    let remote_entries: Vec<EditHistoryEntry> = remote_log
        .iter()
        .filter(|e| e.event_id == local.id)
        .cloned()
        .collect();

    let shared = shared_entry_ids(&local_entries, &remote_entries);
    let local_ahead = local_entries.iter().any(|e| !shared.contains(&e.id));
    let remote_ahead = remote_entries.iter().any(|e| !shared.contains(&e.id));
    match (local_ahead, remote_ahead) {
        (false, true) => return EventBase::from(local),
        (true, false) => return EventBase::from(remote),
        _ => {}
    }

    let merged = merge_logs(&local_entries, &remote_entries);
    EventBase {
        title: match tracked_value(&merged, &shared, EventField::Title) {
            Some(FieldValue::Text(Some(title))) => Some(title),
            _ => None,
        },
        location: match tracked_value(&merged, &shared, EventField::Location) {
            Some(FieldValue::Text(location)) => Some(location),
            _ => None,
        },
        day: match tracked_value(&merged, &shared, EventField::Day) {
            Some(FieldValue::Day(day)) => Some(day),
            _ => None,
        },
        month: None,
        color: None,
    }
}

/// Value of a tracked field at the point the two logs diverged.
fn tracked_value(
    merged: &[EditHistoryEntry],
    shared: &HashSet<EntryId>,
    field: EventField,
) -> Option<FieldValue> {
    let diverged_from = merged
        .iter()
        .filter(|e| !shared.contains(&e.id) && e.touches(field))
        .find_map(|e| e.previous_value(field));
    if diverged_from.is_some() {
        return diverged_from;
    }

    merged
        .iter()
        .rev()
        .filter(|e| shared.contains(&e.id) && e.touches(field))
        .find_map(|e| e.new_value(field))
}
