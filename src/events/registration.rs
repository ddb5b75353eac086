//! Attend / un-attend state machine for a single (event, user) pair.
//!
//! Evaluation is pure: stores take a snapshot of the event while holding
//! their per-event lock, ask this module for a [`Transition`], and apply it
//! before releasing the lock.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Event, EventStatus, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("ACTION_NOT_ALLOWED_ON_PAST_EVENT")]
    PastEvent,

    #[error("ACTION_NOT_ALLOWED_ON_NON_PUBLISHED_EVENT")]
    NotPublished,

    #[error("WAS_ALREADY_REGISTERED_TO_THIS_EVENT")]
    AlreadyRegistered,

    #[error("WAS_NOT_REGISTERED_TO_THIS_EVENT")]
    NotRegistered,

    #[error("EVENT_IS_FULL")]
    EventFull,
}

impl RegistrationError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistrationError::PastEvent => "ACTION_NOT_ALLOWED_ON_PAST_EVENT",
            RegistrationError::NotPublished => "ACTION_NOT_ALLOWED_ON_NON_PUBLISHED_EVENT",
            RegistrationError::AlreadyRegistered => "WAS_ALREADY_REGISTERED_TO_THIS_EVENT",
            RegistrationError::NotRegistered => "WAS_NOT_REGISTERED_TO_THIS_EVENT",
            RegistrationError::EventFull => "EVENT_IS_FULL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationAction {
    Register,
    Unregister,
}

/// Write the store must perform after a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    AddAttendee,
    RemoveAttendee,
}

/// The slice of event state the rules look at, seen from one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationSnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    pub capacity: Option<i32>,
    pub attendee_count: usize,
    pub is_attending: bool,
}

impl RegistrationSnapshot {
    pub fn of(event: &Event, user_id: UserId) -> Self {
        Self {
            timestamp: event.timestamp,
            status: event.status,
            capacity: event.capacity,
            attendee_count: event.attendees_count(),
            is_attending: event.attendees.contains(&user_id),
        }
    }

    fn is_full(&self) -> bool {
        match self.capacity {
            Some(capacity) => self.attendee_count >= usize::try_from(capacity).unwrap_or(0),
            None => false,
        }
    }
}

/// Checks shared by both actions; the past-event check wins over status.
pub fn validate_generic_action(
    snapshot: &RegistrationSnapshot,
    now: DateTime<Utc>,
) -> Result<(), RegistrationError> {
    if snapshot.timestamp < now {
        return Err(RegistrationError::PastEvent);
    }

    if snapshot.status != EventStatus::Published {
        return Err(RegistrationError::NotPublished);
    }

    Ok(())
}

pub fn register(
    snapshot: &RegistrationSnapshot,
    now: DateTime<Utc>,
) -> Result<Transition, RegistrationError> {
    validate_generic_action(snapshot, now)?;

    if snapshot.is_attending {
        return Err(RegistrationError::AlreadyRegistered);
    }

    if snapshot.is_full() {
        return Err(RegistrationError::EventFull);
    }

    Ok(Transition::AddAttendee)
}

pub fn unregister(
    snapshot: &RegistrationSnapshot,
    now: DateTime<Utc>,
) -> Result<Transition, RegistrationError> {
    validate_generic_action(snapshot, now)?;

    if !snapshot.is_attending {
        return Err(RegistrationError::NotRegistered);
    }

    Ok(Transition::RemoveAttendee)
}

pub fn evaluate(
    action: RegistrationAction,
    snapshot: &RegistrationSnapshot,
    now: DateTime<Utc>,
) -> Result<Transition, RegistrationError> {
    match action {
        RegistrationAction::Register => register(snapshot, now),
        RegistrationAction::Unregister => unregister(snapshot, now),
    }
}
