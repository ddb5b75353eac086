//! Persistence of users, categories and events.

mod memory;
mod postgres;

pub use memory::InMemoryEventStore;
pub use postgres::PgEventStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::events::registration::{RegistrationAction, RegistrationError};
use crate::models::{Category, Event, EventChanges, EventId, NewEvent, User, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Deleting a user who still organizes events.
    #[error("user {user_id} still organizes {events} event(s)")]
    ReferentialIntegrity { user_id: UserId, events: usize },

    /// Write names a user or category that does not exist.
    #[error("unknown {entity} {id}")]
    InvalidReference { entity: &'static str, id: i64 },

    /// Update would leave more attendees than the new capacity admits.
    #[error("capacity {capacity} is below the {attendees} registered attendee(s)")]
    CapacityBelowAttendance { capacity: i32, attendees: usize },

    #[error(transparent)]
    Rejected(#[from] RegistrationError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn event_not_found(id: EventId) -> Self {
        StoreError::NotFound { entity: "event", id }
    }
}

/// Rejects a capacity that the current attendee set already exceeds.
fn check_capacity(capacity: Option<i32>, attendees: usize) -> Result<(), StoreError> {
    match capacity {
        Some(limit) if usize::try_from(limit).map_or(true, |limit| attendees > limit) => {
            Err(StoreError::CapacityBelowAttendance {
                capacity: limit,
                attendees,
            })
        }
        _ => Ok(()),
    }
}

/// Durable CRUD for the events domain.
///
/// `created_at`/`updated_at` are always assigned here, never by callers.
/// [`EventStore::apply_registration`] must evaluate the registration rules and
/// perform the resulting write as one atomic unit per event.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_user(&self, username: &str) -> Result<User, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Fails with [`StoreError::ReferentialIntegrity`] while the user organizes
    /// any event. Attendances of the user are dropped.
    async fn delete_user(&self, id: UserId) -> Result<(), StoreError>;

    async fn create_category(&self, name: &str) -> Result<Category, StoreError>;

    /// Newest first.
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;

    async fn create_event(&self, event: NewEvent) -> Result<Event, StoreError>;

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    async fn list_events(&self) -> Result<Vec<Event>, StoreError>;

    /// Fails with [`StoreError::CapacityBelowAttendance`] when the new capacity
    /// is smaller than the number of current attendees.
    async fn update_event(&self, id: EventId, changes: EventChanges) -> Result<Event, StoreError>;

    /// Unconditional membership write; adding an existing attendee is a no-op.
    async fn add_attendee(&self, event_id: EventId, user_id: UserId) -> Result<(), StoreError>;

    async fn remove_attendee(&self, event_id: EventId, user_id: UserId)
        -> Result<(), StoreError>;

    async fn count_attendees(&self, event_id: EventId) -> Result<usize, StoreError>;

    async fn apply_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
        action: RegistrationAction,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn register(
        &self,
        event_id: EventId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.apply_registration(event_id, user_id, RegistrationAction::Register, now)
            .await
    }

    async fn unregister(
        &self,
        event_id: EventId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.apply_registration(event_id, user_id, RegistrationAction::Unregister, now)
            .await
    }
}
