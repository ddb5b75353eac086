//! Who may do what to an event.
//!
//! Authentication is settled before any of this runs, so every action starts
//! from [`Permission::IsAuthenticated`]. Only updates add the organizer check.

use thiserror::Error;

use crate::models::{Event, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    List,
    Retrieve,
    Create,
    Update,
    Register,
    Unregister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    IsAuthenticated,
    IsEventOrganizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("user {principal} may not {action:?} this event")]
pub struct Forbidden {
    pub principal: UserId,
    pub action: EventAction,
}

impl EventAction {
    pub fn permissions(self) -> &'static [Permission] {
        match self {
            EventAction::Update => &[Permission::IsAuthenticated, Permission::IsEventOrganizer],
            EventAction::List
            | EventAction::Retrieve
            | EventAction::Create
            | EventAction::Register
            | EventAction::Unregister => &[Permission::IsAuthenticated],
        }
    }
}

impl Permission {
    /// Object-level permissions pass when there is no object to check against.
    pub fn allows(self, principal: UserId, event: Option<&Event>) -> bool {
        match self {
            Permission::IsAuthenticated => true,
            Permission::IsEventOrganizer => event.map_or(true, |e| can_update(principal, e)),
        }
    }
}

pub fn can_update(principal: UserId, event: &Event) -> bool {
    event.is_organized_by(principal)
}

pub fn authorize(
    action: EventAction,
    principal: UserId,
    event: Option<&Event>,
) -> Result<(), Forbidden> {
    if action
        .permissions()
        .iter()
        .all(|permission| permission.allows(principal, event))
    {
        Ok(())
    } else {
        Err(Forbidden { principal, action })
    }
}
