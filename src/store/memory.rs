use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{check_capacity, EventStore, StoreError};
use crate::events::registration::{self, RegistrationAction, RegistrationSnapshot, Transition};
use crate::models::{
    Category, CategoryId, Event, EventChanges, EventId, NewEvent, User, UserId,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    categories: BTreeMap<CategoryId, Category>,
    events: BTreeMap<EventId, Event>,
    last_user_id: UserId,
    last_category_id: CategoryId,
    last_event_id: EventId,
}

impl Tables {
    fn check_categories<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a CategoryId>,
    ) -> Result<(), StoreError> {
        match ids.into_iter().find(|id| !self.categories.contains_key(*id)) {
            Some(id) => Err(StoreError::InvalidReference {
                entity: "category",
                id: *id,
            }),
            None => Ok(()),
        }
    }

    fn check_user(&self, id: UserId) -> Result<(), StoreError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::InvalidReference { entity: "user", id })
        }
    }

    fn event_mut(&mut self, id: EventId) -> Result<&mut Event, StoreError> {
        self.events
            .get_mut(&id)
            .ok_or_else(|| StoreError::event_not_found(id))
    }
}

/// Store kept entirely in process memory.
///
/// A single write lock guards every mutation, so registration checks and the
/// membership write they authorize can never interleave with another request.
#[derive(Default)]
pub struct InMemoryEventStore {
    tables: RwLock<Tables>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create_user(&self, username: &str) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        tables.last_user_id += 1;
        let user = User {
            id: tables.last_user_id,
            username: username.to_string(),
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn delete_user(&self, id: UserId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&id) {
            return Err(StoreError::NotFound { entity: "user", id });
        }

        let organized = tables
            .events
            .values()
            .filter(|event| event.is_organized_by(id))
            .count();
        if organized > 0 {
            return Err(StoreError::ReferentialIntegrity {
                user_id: id,
                events: organized,
            });
        }

        for event in tables.events.values_mut() {
            event.attendees.remove(&id);
        }
        tables.users.remove(&id);
        Ok(())
    }

    async fn create_category(&self, name: &str) -> Result<Category, StoreError> {
        let mut tables = self.tables.write().await;
        tables.last_category_id += 1;
        let now = Utc::now();
        let category = Category {
            id: tables.last_category_id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .categories
            .values()
            .rev()
            .cloned()
            .collect())
    }

    async fn create_event(&self, new: NewEvent) -> Result<Event, StoreError> {
        let mut tables = self.tables.write().await;
        tables.check_user(new.organizer)?;
        tables.check_categories(&new.categories)?;

        tables.last_event_id += 1;
        let now = Utc::now();
        let event = Event {
            id: tables.last_event_id,
            title: new.title,
            organizer: Some(new.organizer),
            status: new.status,
            place: new.place,
            timestamp: new.timestamp,
            description: new.description,
            categories: new.categories,
            capacity: new.capacity,
            attendees: Default::default(),
            created_at: now,
            updated_at: now,
        };
        tables.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.tables.read().await.events.values().cloned().collect())
    }

    async fn update_event(&self, id: EventId, changes: EventChanges) -> Result<Event, StoreError> {
        let mut tables = self.tables.write().await;
        tables.check_categories(&changes.categories)?;

        let event = tables.event_mut(id)?;
        check_capacity(changes.capacity, event.attendees_count())?;
        event.title = changes.title;
        event.status = changes.status;
        event.place = changes.place;
        event.timestamp = changes.timestamp;
        event.description = changes.description;
        event.categories = changes.categories;
        event.capacity = changes.capacity;
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn add_attendee(&self, event_id: EventId, user_id: UserId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.check_user(user_id)?;
        tables.event_mut(event_id)?.attendees.insert(user_id);
        Ok(())
    }

    async fn remove_attendee(&self, event_id: EventId, user_id: UserId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.event_mut(event_id)?.attendees.remove(&user_id);
        Ok(())
    }

    async fn count_attendees(&self, event_id: EventId) -> Result<usize, StoreError> {
        self.tables
            .read()
            .await
            .events
            .get(&event_id)
            .map(Event::attendees_count)
            .ok_or_else(|| StoreError::event_not_found(event_id))
    }

    async fn apply_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
        action: RegistrationAction,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.check_user(user_id)?;
        let event = tables.event_mut(event_id)?;

        let snapshot = RegistrationSnapshot::of(event, user_id);
        match registration::evaluate(action, &snapshot, now)? {
            Transition::AddAttendee => event.attendees.insert(user_id),
            Transition::RemoveAttendee => event.attendees.remove(&user_id),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::registration::RegistrationError;
    use crate::models::EventStatus;
    use chrono::Duration;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn new_event(organizer: UserId, capacity: Option<i32>) -> NewEvent {
        NewEvent {
            title: "e1".to_string(),
            organizer,
            status: EventStatus::Published,
            place: "any place".to_string(),
            timestamp: Utc::now() + Duration::days(1),
            description: String::new(),
            categories: BTreeSet::new(),
            capacity,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_timestamps() {
        let store = InMemoryEventStore::new();
        let user = store.create_user("u1").await.unwrap();
        let first = store.create_event(new_event(user.id, None)).await.unwrap();
        let second = store.create_event(new_event(user.id, None)).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.organizer, Some(user.id));
        assert_eq!(first.created_at, first.updated_at);
        assert!(first.attendees.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_category() {
        let store = InMemoryEventStore::new();
        let user = store.create_user("u1").await.unwrap();
        let mut new = new_event(user.id, None);
        new.categories.insert(42);

        let err = store.create_event(new).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidReference {
                entity: "category",
                id: 42
            }
        ));
    }

    #[tokio::test]
    async fn test_update_touches_updated_at_only() {
        let store = InMemoryEventStore::new();
        let user = store.create_user("u1").await.unwrap();
        let music = store.create_category("music").await.unwrap();
        let event = store.create_event(new_event(user.id, None)).await.unwrap();

        let updated = store
            .update_event(
                event.id,
                EventChanges {
                    title: "renamed".to_string(),
                    status: EventStatus::Hidden,
                    place: event.place.clone(),
                    timestamp: event.timestamp,
                    description: "...".to_string(),
                    categories: BTreeSet::from([music.id]),
                    capacity: Some(3),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.created_at, event.created_at);
        assert!(updated.updated_at >= event.updated_at);
        assert_eq!(updated.organizer, event.organizer);
        assert_eq!(updated.categories, BTreeSet::from([music.id]));
    }

    #[tokio::test]
    async fn test_update_cannot_shrink_capacity_below_attendance() {
        let store = InMemoryEventStore::new();
        let organizer = store.create_user("u1").await.unwrap();
        let event = store
            .create_event(new_event(organizer.id, Some(5)))
            .await
            .unwrap();
        for name in ["a", "b", "c"] {
            let user = store.create_user(name).await.unwrap();
            store.add_attendee(event.id, user.id).await.unwrap();
        }

        let changes = |capacity| EventChanges {
            title: event.title.clone(),
            status: event.status,
            place: event.place.clone(),
            timestamp: event.timestamp,
            description: event.description.clone(),
            categories: BTreeSet::new(),
            capacity,
        };

        let err = store
            .update_event(event.id, changes(Some(2)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapacityBelowAttendance {
                capacity: 2,
                attendees: 3
            }
        ));
        let stored = store.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.capacity, Some(5));

        let updated = store
            .update_event(event.id, changes(Some(3)))
            .await
            .unwrap();
        assert_eq!(updated.capacity, Some(3));
    }

    #[tokio::test]
    async fn test_categories_listed_newest_first() {
        let store = InMemoryEventStore::new();
        store.create_category("c1").await.unwrap();
        store.create_category("c2").await.unwrap();

        let names: Vec<String> = store
            .list_categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(names, vec!["c2", "c1"]);
    }

    #[tokio::test]
    async fn test_attendee_set_semantics() {
        let store = InMemoryEventStore::new();
        let u1 = store.create_user("u1").await.unwrap();
        let u2 = store.create_user("u2").await.unwrap();
        let event = store.create_event(new_event(u1.id, None)).await.unwrap();

        store.add_attendee(event.id, u1.id).await.unwrap();
        store.add_attendee(event.id, u1.id).await.unwrap();
        store.add_attendee(event.id, u2.id).await.unwrap();
        assert_eq!(store.count_attendees(event.id).await.unwrap(), 2);

        store.remove_attendee(event.id, u2.id).await.unwrap();
        assert_eq!(store.count_attendees(event.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_organizer_cannot_be_deleted() {
        let store = InMemoryEventStore::new();
        let organizer = store.create_user("u1").await.unwrap();
        let attendee = store.create_user("u2").await.unwrap();
        let event = store.create_event(new_event(organizer.id, None)).await.unwrap();
        store.add_attendee(event.id, attendee.id).await.unwrap();

        let err = store.delete_user(organizer.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ReferentialIntegrity { events: 1, .. }
        ));

        store.delete_user(attendee.id).await.unwrap();
        assert_eq!(store.count_attendees(event.id).await.unwrap(), 0);
        assert!(store.get_user(attendee.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_round_trip_restores_attendees() {
        let store = InMemoryEventStore::new();
        let u1 = store.create_user("u1").await.unwrap();
        let u2 = store.create_user("u2").await.unwrap();
        let event = store.create_event(new_event(u1.id, None)).await.unwrap();
        store.add_attendee(event.id, u2.id).await.unwrap();
        let before = store.get_event(event.id).await.unwrap().unwrap().attendees;

        let now = Utc::now();
        store.register(event.id, u1.id, now).await.unwrap();
        store.unregister(event.id, u1.id, now).await.unwrap();

        let after = store.get_event(event.id).await.unwrap().unwrap().attendees;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_register_rejections_leave_state_untouched() {
        let store = InMemoryEventStore::new();
        let u1 = store.create_user("u1").await.unwrap();
        let u2 = store.create_user("u2").await.unwrap();
        let event = store.create_event(new_event(u1.id, Some(1))).await.unwrap();
        let now = Utc::now();

        store.register(event.id, u1.id, now).await.unwrap();
        let err = store.register(event.id, u1.id, now).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Rejected(RegistrationError::AlreadyRegistered)
        ));

        let err = store.register(event.id, u2.id, now).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(RegistrationError::EventFull)));

        let err = store.unregister(event.id, u2.id, now).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Rejected(RegistrationError::NotRegistered)
        ));
        assert_eq!(store.count_attendees(event.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_register_unknown_event() {
        let store = InMemoryEventStore::new();
        let u1 = store.create_user("u1").await.unwrap();
        let err = store.register(99, u1.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "event", id: 99 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_respect_capacity() {
        let store = Arc::new(InMemoryEventStore::new());
        let organizer = store.create_user("organizer").await.unwrap();
        let event = store
            .create_event(new_event(organizer.id, Some(5)))
            .await
            .unwrap();

        let mut users = Vec::new();
        for i in 0..40 {
            users.push(store.create_user(&format!("u{i}")).await.unwrap().id);
        }

        let now = Utc::now();
        let handles: Vec<_> = users
            .into_iter()
            .map(|user_id| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.register(event.id, user_id, now).await })
            })
            .collect();

        let mut accepted = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => accepted += 1,
                Err(StoreError::Rejected(RegistrationError::EventFull)) => full += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(accepted, 5);
        assert_eq!(full, 35);
        assert_eq!(store.count_attendees(event.id).await.unwrap(), 5);
    }
}
