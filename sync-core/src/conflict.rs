//! Three-way conflict resolution for calendar events.
//!
//! [`resolve`] compares `local` and `remote` against a common [`EventBase`],
//! field by field. A field changed on one side only takes that side's value;
//! a field changed on both sides to different values, or differing with no
//! known base value, is a conflict and is settled by a per-field rule. Every rule is symmetric in `local`/`remote`, so both
//! peers of a session compute the same merged event.

use std::collections::{BTreeSet, HashSet};

use pairsync_types::{Event, EventField, ResolutionMethod};

/// Default separator used when two text edits are combined.
pub const DEFAULT_TEXT_SEPARATOR: &str = " | ";

/// Number of conflicting fields at which severity becomes [`Severity::High`].
pub const HIGH_SEVERITY_FIELDS: usize = 3;

/// Tunables for conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
    /// Inserted between combined text values.
    pub text_separator: String,
    /// Fields whose conflicts escalate severity to at least `Moderate`.
    pub critical_fields: BTreeSet<EventField>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            text_separator: DEFAULT_TEXT_SEPARATOR.to_string(),
            critical_fields: BTreeSet::from([EventField::Day]),
        }
    }
}

/// How serious the conflicts of one merge were.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    /// No conflicts.
    #[default]
    None,
    /// Only non-critical fields conflicted.
    Low,
    /// A critical field conflicted.
    Moderate,
    /// Conflicts on three or more fields.
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
        };
        f.write_str(s)
    }
}

/// Structured description of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Fields that were compared.
    pub fields_compared: Vec<EventField>,
    /// Fields changed differently on both sides.
    pub conflicting_fields: Vec<EventField>,
    /// Overall severity.
    pub severity: Severity,
    /// How the merged event was produced.
    pub resolution: ResolutionMethod,
}

impl MergeReport {
    /// Whether any field conflicted.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicting_fields.is_empty()
    }
}

/// Merged event plus its report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The merged event.
    pub merged: Event,
    /// What happened.
    pub report: MergeReport,
}

/// Common ancestor of two event copies, field by field.
///
/// A `None` field has no known ancestor value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBase {
    /// Title both copies started from.
    pub title: Option<String>,
    /// Location both copies started from; `Some(None)` is a known empty location.
    pub location: Option<Option<String>>,
    /// Day both copies started from.
    pub day: Option<u8>,
    /// Month both copies started from.
    pub month: Option<u8>,
    /// Color both copies started from.
    pub color: Option<String>,
}

impl From<&Event> for EventBase {
    fn from(event: &Event) -> Self {
        Self {
            title: Some(event.title.clone()),
            location: Some(event.location.clone()),
            day: Some(event.day),
            month: Some(event.month),
            color: Some(event.color.clone()),
        }
    }
}

/// Which side a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Same,
    Local,
    Remote,
    Conflict,
}

/// Merge two copies of the same event against their common ancestor.
///
/// A field without a base value conflicts whenever the copies differ.
pub fn resolve(
    base: &EventBase,
    local: &Event,
    remote: &Event,
    policy: &MergePolicy,
) -> MergeOutcome {
    debug_assert_eq!(local.id, remote.id, "resolve called on different events");

    let remote_is_newer = remote.last_modified_at > local.last_modified_at;
    let local_is_newer = local.last_modified_at > remote.last_modified_at;

    let mut merged = local.clone();
    let mut sources = Vec::with_capacity(EventField::ALL.len());
    let mut conflicting = Vec::new();

    // title
    let (title, src) = pick(
        base.title.as_ref(),
        &local.title,
        &remote.title,
        |l, r| merge_text(l, r, &policy.text_separator),
    );
    merged.title = title;
    sources.push((EventField::Title, src));

    // location
    let (location, src) = pick(
        base.location.as_ref(),
        &local.location,
        &remote.location,
        |l, r| match (l, r) {
            (Some(l), Some(r)) => Some(merge_text(l, r, &policy.text_separator)),
            (Some(v), None) | (None, Some(v)) => Some(v.clone()),
            (None, None) => None,
        },
    );
    merged.location = location;
    sources.push((EventField::Location, src));

    // day
    let (day, src) = pick(base.day.as_ref(), &local.day, &remote.day, |l, r| {
        newer_or_larger(*l, *r, local_is_newer, remote_is_newer)
    });
    merged.day = day;
    sources.push((EventField::Day, src));

    // month
    let (month, src) = pick(
        base.month.as_ref(),
        &local.month,
        &remote.month,
        |l, r| newer_or_larger(*l, *r, local_is_newer, remote_is_newer),
    );
    merged.month = month;
    sources.push((EventField::Month, src));

    // color
    let (color, src) = pick(
        base.color.as_ref(),
        &local.color,
        &remote.color,
        |l, r| newer_or_larger(l.clone(), r.clone(), local_is_newer, remote_is_newer),
    );
    merged.color = color;
    sources.push((EventField::Color, src));

    for (field, src) in &sources {
        if *src == Source::Conflict {
            conflicting.push(*field);
        }
    }

    merged.created_at = local.created_at.min(remote.created_at);
    merged.last_modified_at = local.last_modified_at.max(remote.last_modified_at);
    merged.last_modified_by = if local_is_newer {
        local.last_modified_by.clone()
    } else if remote_is_newer {
        remote.last_modified_by.clone()
    } else {
        local
            .last_modified_by
            .clone()
            .max(remote.last_modified_by.clone())
    };

    let severity = severity_of(&conflicting, policy);
    let resolution = resolution_of(&sources);

    MergeOutcome {
        merged,
        report: MergeReport {
            fields_compared: EventField::ALL.to_vec(),
            conflicting_fields: conflicting,
            severity,
            resolution,
        },
    }
}

/// Choose a value for one field.
fn pick<T, F>(base: Option<&T>, local: &T, remote: &T, on_conflict: F) -> (T, Source)
where
    T: Clone + PartialEq,
    F: FnOnce(&T, &T) -> T,
{
    if local == remote {
        return (local.clone(), Source::Same);
    }
    match base {
        Some(b) if b == local => (remote.clone(), Source::Remote),
        Some(b) if b == remote => (local.clone(), Source::Local),
        _ => (on_conflict(local, remote), Source::Conflict),
    }
}

/// Combine two differing text values without losing either.
///
/// If one contains the other the longer one is kept. Otherwise the lexically
/// smaller value leads, verbatim, and each separator-delimited part of the
/// other value that the leader does not already hold is appended. Parts are
/// compared as whole strings, so a part typed twice in the trailing value
/// collapses once the leader holds it.
pub fn merge_text(a: &str, b: &str, separator: &str) -> String {
    if a.contains(b) {
        return a.to_string();
    }
    if b.contains(a) {
        return b.to_string();
    }

    let (lead, rest) = if a <= b { (a, b) } else { (b, a) };
    if separator.is_empty() {
        return format!("{lead}{rest}");
    }

    let held: HashSet<&str> = lead.split(separator).collect();
    let mut merged = lead.to_string();
    for part in rest.split(separator) {
        if !held.contains(part) {
            merged.push_str(separator);
            merged.push_str(part);
        }
    }
    merged
}

fn newer_or_larger<T: Ord>(local: T, remote: T, local_is_newer: bool, remote_is_newer: bool) -> T {
    if local_is_newer {
        local
    } else if remote_is_newer {
        remote
    } else {
        local.max(remote)
    }
}

fn severity_of(conflicting: &[EventField], policy: &MergePolicy) -> Severity {
    if conflicting.is_empty() {
        Severity::None
    } else if conflicting.len() >= HIGH_SEVERITY_FIELDS {
        Severity::High
    } else if conflicting
        .iter()
        .any(|f| policy.critical_fields.contains(f))
    {
        Severity::Moderate
    } else {
        Severity::Low
    }
}

fn resolution_of(sources: &[(EventField, Source)]) -> ResolutionMethod {
    let any = |s: Source| sources.iter().any(|(_, src)| *src == s);
    if any(Source::Conflict) {
        ResolutionMethod::AutoResolved
    } else {
        match (any(Source::Local), any(Source::Remote)) {
            (true, true) => ResolutionMethod::FieldMerge,
            (false, true) => ResolutionMethod::TookRemote,
            (true, false) => ResolutionMethod::TookLocal,
            (false, false) => ResolutionMethod::Unchanged,
        }
    }
}
