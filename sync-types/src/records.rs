//! The four record kinds exchanged and persisted by pairsync.
//!
//! Records are owned by the application's repository; the sync core reads
//! them, ships them over the wire, and writes merged versions back.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DeviceId, EntryId, EventId, PeerId, ProtocolError, Timestamp};

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier; at most one Event per id.
    pub id: EventId,
    /// Month of the year, 1-12.
    pub month: u8,
    /// Event title.
    pub title: String,
    /// Optional location.
    pub location: Option<String>,
    /// Day of the month, 1-31.
    pub day: u8,
    /// When the event was first created.
    pub created_at: Timestamp,
    /// When the event was last modified. Never decreases locally.
    pub last_modified_at: Timestamp,
    /// Device that made the last modification.
    pub last_modified_by: DeviceId,
    /// Display color (free-form, e.g. `"#ff8800"` or `"blue"`).
    pub color: String,
}

impl Event {
    /// Check month/day ranges.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !(1..=12).contains(&self.month) {
            return Err(ProtocolError::MalformedBatch(format!(
                "event {} has month {}",
                self.id, self.month
            )));
        }
        if !(1..=31).contains(&self.day) {
            return Err(ProtocolError::MalformedBatch(format!(
                "event {} has day {}",
                self.id, self.day
            )));
        }
        Ok(())
    }
}

/// What an edit did to its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The event was created.
    Create,
    /// One or more fields were updated.
    #[default]
    Update,
    /// The event was deleted. The Event record itself is never removed.
    Delete,
}

/// One entry in a device's append-only edit log.
///
/// Each previous/new pair is optional; a field is "touched" by the entry
/// when either half of its pair is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditHistoryEntry {
    /// Unique identifier of this entry.
    pub id: EntryId,
    /// Event this entry applies to. Weak reference.
    pub event_id: EventId,
    /// Device that recorded the edit.
    pub device_id: DeviceId,
    /// Human-readable name of that device at the time of the edit.
    pub device_name: String,
    /// Kind of change.
    #[serde(default)]
    pub change: ChangeKind,
    /// Title before the edit.
    pub previous_title: Option<String>,
    /// Title after the edit.
    pub new_title: Option<String>,
    /// Location before the edit.
    pub previous_location: Option<String>,
    /// Location after the edit.
    pub new_location: Option<String>,
    /// Day before the edit.
    pub previous_day: Option<u8>,
    /// Day after the edit.
    pub new_day: Option<u8>,
    /// When the edit was recorded, by the editing device's clock.
    pub timestamp: Timestamp,
}

/// Event fields that can be compared, merged and tracked by history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventField {
    /// `Event::title`
    Title,
    /// `Event::location`
    Location,
    /// `Event::day`
    Day,
    /// `Event::month`
    Month,
    /// `Event::color`
    Color,
}

impl EventField {
    /// All mergeable fields in comparison order.
    pub const ALL: [EventField; 5] = [
        EventField::Title,
        EventField::Location,
        EventField::Day,
        EventField::Month,
        EventField::Color,
    ];

    /// Fields recorded by edit history entries.
    pub const TRACKED: [EventField; 3] = [EventField::Title, EventField::Location, EventField::Day];

    /// Lowercase field name as used in config files and log details.
    pub fn name(&self) -> &'static str {
        match self {
            EventField::Title => "title",
            EventField::Location => "location",
            EventField::Day => "day",
            EventField::Month => "month",
            EventField::Color => "color",
        }
    }

    /// Parse a lowercase field name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl std::fmt::Display for EventField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A tracked field value as recorded in history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    /// Title or location text. `None` only occurs for a cleared location.
    Text(Option<String>),
    /// Day of month.
    Day(u8),
}

impl EditHistoryEntry {
    /// Whether this entry touched the given field.
    pub fn touches(&self, field: EventField) -> bool {
        match field {
            EventField::Title => self.previous_title.is_some() || self.new_title.is_some(),
            EventField::Location => {
                self.previous_location.is_some() || self.new_location.is_some()
            }
            EventField::Day => self.previous_day.is_some() || self.new_day.is_some(),
            EventField::Month | EventField::Color => false,
        }
    }

    /// Value of `field` before this edit, if the edit touched it and the
    /// value is recoverable.
    ///
    /// A missing previous title or day on a touched field (typically a
    /// `Create`) is not recoverable and yields `None`. A missing previous
    /// location means the event had no location.
    pub fn previous_value(&self, field: EventField) -> Option<FieldValue> {
        if !self.touches(field) {
            return None;
        }
        match field {
            EventField::Title => self
                .previous_title
                .clone()
                .map(|t| FieldValue::Text(Some(t))),
            EventField::Location => Some(FieldValue::Text(self.previous_location.clone())),
            EventField::Day => self.previous_day.map(FieldValue::Day),
            EventField::Month | EventField::Color => None,
        }
    }

    /// Value of `field` after this edit, if the edit touched it.
    pub fn new_value(&self, field: EventField) -> Option<FieldValue> {
        if !self.touches(field) {
            return None;
        }
        match field {
            EventField::Title => self.new_title.clone().map(|t| FieldValue::Text(Some(t))),
            EventField::Location => Some(FieldValue::Text(self.new_location.clone())),
            EventField::Day => self.new_day.map(FieldValue::Day),
            EventField::Month | EventField::Color => None,
        }
    }
}

/// A device known to this one, including the local device itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    /// Device identifier.
    pub id: DeviceId,
    /// Transport-level address.
    pub peer_identifier: PeerId,
    /// User-assigned name, if any.
    pub custom_name: Option<String>,
    /// When the last successful session with this peer finished.
    pub last_sync_timestamp: Option<Timestamp>,
    /// True for exactly one record: the device itself.
    pub is_local_device: bool,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// Data exchanged and committed.
    Completed,
    /// Terminal error or retries exhausted.
    Failed,
    /// Cancelled by the application.
    Cancelled,
}

/// Summary of how the conflicts of a session were settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResolutionMethod {
    /// Nothing needed merging.
    Unchanged,
    /// Local copy kept as-is.
    TookLocal,
    /// Remote copy taken as-is.
    TookRemote,
    /// Disjoint field changes combined without conflict.
    FieldMerge,
    /// At least one field conflict settled by policy.
    AutoResolved,
}

impl std::fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionMethod::Unchanged => "unchanged",
            ResolutionMethod::TookLocal => "took-local",
            ResolutionMethod::TookRemote => "took-remote",
            ResolutionMethod::FieldMerge => "field-merge",
            ResolutionMethod::AutoResolved => "auto-resolved",
        };
        f.write_str(s)
    }
}

/// Append-only record of one sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// When the session ended.
    pub timestamp: Timestamp,
    /// Peer the session was with.
    pub peer_identifier: PeerId,
    /// Peer's name, if learned during the handshake.
    pub peer_name: Option<String>,
    /// Events received from the peer.
    pub events_received: u32,
    /// Events sent to the peer.
    pub events_sent: u32,
    /// History entries received from the peer.
    pub history_received: u32,
    /// History entries sent to the peer.
    pub history_sent: u32,
    /// Conflicts resolved by the final merge.
    pub conflict_count: u32,
    /// Strongest resolution applied across all merged events.
    pub resolution_method: ResolutionMethod,
    /// How the session ended.
    pub outcome: SessionOutcome,
    /// Free-text summary, including any error.
    pub details: String,
}
