use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::CategoryId;
use super::user::UserId;

pub type EventId = i64;

/// Publication status of an event. Only published events accept registrations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    #[default]
    Published,
    Hidden,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Published => "PUBLISHED",
            EventStatus::Hidden => "HIDDEN",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for EventStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLISHED" => Ok(EventStatus::Published),
            "HIDDEN" => Ok(EventStatus::Hidden),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// An event together with its category tags and attendee set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    /// `None` only when the organizing account no longer exists.
    pub organizer: Option<UserId>,
    pub status: EventStatus,
    pub place: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub categories: BTreeSet<CategoryId>,
    pub capacity: Option<i32>,
    pub attendees: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn attendees_count(&self) -> usize {
        self.attendees.len()
    }

    pub fn is_organized_by(&self, user_id: UserId) -> bool {
        self.organizer == Some(user_id)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// Validated input for inserting an event. The organizer is always the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub organizer: UserId,
    pub status: EventStatus,
    pub place: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub categories: BTreeSet<CategoryId>,
    pub capacity: Option<i32>,
}

/// Full replacement of the writable fields of an event.
///
/// The organizer is immutable and attendees only change through registration,
/// so neither appears here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventChanges {
    pub title: String,
    pub status: EventStatus,
    pub place: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub categories: BTreeSet<CategoryId>,
    pub capacity: Option<i32>,
}

/// JSON representation returned by the events resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    pub id: EventId,
    pub title: String,
    pub organizer: Option<UserId>,
    pub status: EventStatus,
    pub place: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub categories: Vec<CategoryId>,
    pub capacity: Option<i32>,
    pub attendees: Vec<UserId>,
    pub attendees_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        let attendees_count = event.attendees_count();
        Self {
            id: event.id,
            title: event.title,
            organizer: event.organizer,
            status: event.status,
            place: event.place,
            timestamp: event.timestamp,
            description: event.description,
            categories: event.categories.into_iter().collect(),
            capacity: event.capacity,
            attendees: event.attendees.into_iter().collect(),
            attendees_count,
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}
