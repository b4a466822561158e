//! Causal merge of edit history logs.
//!
//! Two peers' logs are combined into one deduplicated, causally ordered log.
//! Wall clocks are not trusted: an entry whose `previous` value equals the
//! `new` value of another device's entry for the same event is placed after
//! it, whatever the timestamps say. Among entries with no causal relation the
//! order is `(timestamp, device_id, id)`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use pairsync_types::{ChangeKind, EditHistoryEntry, EntryId, EventId};

/// Total order used for ties and cycle breaking.
pub fn entry_order(a: &EditHistoryEntry, b: &EditHistoryEntry) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.device_id.cmp(&b.device_id))
        .then_with(|| a.id.cmp(&b.id))
}

/// Whether `later` continues from `earlier`'s edit.
///
/// Only entries for the same event from different devices are linked, and
/// only through a field where both halves of the comparison are present.
pub fn depends_on(later: &EditHistoryEntry, earlier: &EditHistoryEntry) -> bool {
    if later.id == earlier.id
        || later.event_id != earlier.event_id
        || later.device_id == earlier.device_id
    {
        return false;
    }

    let title = later.previous_title.is_some() && later.previous_title == earlier.new_title;
    let location =
        later.previous_location.is_some() && later.previous_location == earlier.new_location;
    let day = later.previous_day.is_some() && later.previous_day == earlier.new_day;

    title || location || day
}

/// Merge two logs into one deduplicated, causally ordered log.
///
/// Pure, deterministic, and symmetric: `merge_logs(a, b)` and
/// `merge_logs(b, a)` produce the same sequence. Merging a log with itself
/// or with an already-merged result changes nothing.
pub fn merge_logs(a: &[EditHistoryEntry], b: &[EditHistoryEntry]) -> Vec<EditHistoryEntry> {
    // Dedupe by id
    let mut seen: HashSet<EntryId> = HashSet::new();
    let mut entries: Vec<&EditHistoryEntry> = Vec::with_capacity(a.len() + b.len());
    for entry in a.iter().chain(b.iter()) {
        if seen.insert(entry.id) {
            entries.push(entry);
        }
    }
    entries.sort_by(|x, y| entry_order(x, y));

    let n = entries.len();
    // Index in `entries` doubles as priority: lower index = earlier.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (i, later) in entries.iter().enumerate() {
        for (j, earlier) in entries.iter().enumerate() {
            if i != j && depends_on(later, earlier) {
                dependents[j].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut remaining: BTreeSet<usize> = (0..n).collect();
    let mut ordered = Vec::with_capacity(n);

    while !remaining.is_empty() {
        let next = match ready.pop_first() {
            Some(i) => i,
            // Cycle: release the smallest remaining entry.
            None => match remaining.first() {
                Some(&i) => i,
                None => break,
            },
        };
        if !remaining.remove(&next) {
            continue;
        }
        ordered.push(entries[next].clone());

        for &dep in &dependents[next] {
            if remaining.contains(&dep) {
                in_degree[dep] = in_degree[dep].saturating_sub(1);
                if in_degree[dep] == 0 {
                    ready.insert(dep);
                }
            }
        }
    }

    ordered
}

/// Merge two logs and group the result by event.
pub fn merge_event_logs(
    a: &[EditHistoryEntry],
    b: &[EditHistoryEntry],
) -> BTreeMap<EventId, Vec<EditHistoryEntry>> {
    let mut grouped: BTreeMap<EventId, Vec<EditHistoryEntry>> = BTreeMap::new();
    for entry in merge_logs(a, b) {
        grouped.entry(entry.event_id).or_default().push(entry);
    }
    grouped
}

/// Ids present in both logs.
pub fn shared_entry_ids(a: &[EditHistoryEntry], b: &[EditHistoryEntry]) -> HashSet<EntryId> {
    let left: HashSet<EntryId> = a.iter().map(|e| e.id).collect();
    b.iter().map(|e| e.id).filter(|id| left.contains(id)).collect()
}

/// Whether the latest entry for `event_id` in a merged log is a deletion.
pub fn is_tombstoned(event_id: EventId, merged_log: &[EditHistoryEntry]) -> bool {
    merged_log
        .iter()
        .rev()
        .find(|e| e.event_id == event_id)
        .is_some_and(|e| e.change == ChangeKind::Delete)
}
