use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, Transaction};

use super::{check_capacity, EventStore, StoreError};
use crate::events::registration::{self, RegistrationAction, RegistrationSnapshot, Transition};
use crate::models::{
    Category, CategoryId, Event, EventChanges, EventId, EventStatus, NewEvent, User, UserId,
};

const FOREIGN_KEY_VIOLATION: &str = "23503";

const EVENT_COLUMNS: &str = "id, title, organizer_id, status, place, \"timestamp\", description, \
                             capacity, created_at, updated_at";

#[derive(Debug, FromRow)]
struct EventRow {
    id: EventId,
    title: String,
    organizer_id: Option<UserId>,
    status: String,
    place: String,
    timestamp: DateTime<Utc>,
    description: String,
    capacity: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EventRow {
    fn into_event(
        self,
        categories: BTreeSet<CategoryId>,
        attendees: BTreeSet<UserId>,
    ) -> Result<Event, StoreError> {
        let status = self
            .status
            .parse::<EventStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(Event {
            id: self.id,
            title: self.title,
            organizer: self.organizer_id,
            status,
            place: self.place,
            timestamp: self.timestamp,
            description: self.description,
            categories,
            capacity: self.capacity,
            attendees,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct Link {
    event_id: EventId,
    other_id: i64,
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == FOREIGN_KEY_VIOLATION)
}

/// Store backed by PostgreSQL. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn links(
        &self,
        table_query: &str,
        event_ids: &[EventId],
    ) -> Result<HashMap<EventId, BTreeSet<i64>>, StoreError> {
        let rows: Vec<Link> = sqlx::query_as(table_query)
            .bind(event_ids)
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: HashMap<EventId, BTreeSet<i64>> = HashMap::new();
        for row in rows {
            grouped.entry(row.event_id).or_default().insert(row.other_id);
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<EventRow>) -> Result<Vec<Event>, StoreError> {
        let ids: Vec<EventId> = rows.iter().map(|row| row.id).collect();
        let mut categories = self
            .links(
                "SELECT event_id, category_id AS other_id FROM event_categories \
                 WHERE event_id = ANY($1)",
                &ids,
            )
            .await?;
        let mut attendees = self
            .links(
                "SELECT event_id, user_id AS other_id FROM event_attendees \
                 WHERE event_id = ANY($1)",
                &ids,
            )
            .await?;

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                row.into_event(
                    categories.remove(&id).unwrap_or_default(),
                    attendees.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn check_categories(
        tx: &mut Transaction<'_, Postgres>,
        categories: &BTreeSet<CategoryId>,
    ) -> Result<(), StoreError> {
        if categories.is_empty() {
            return Ok(());
        }

        let ids: Vec<CategoryId> = categories.iter().copied().collect();
        let found: Vec<(CategoryId,)> = sqlx::query_as("SELECT id FROM categories WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut **tx)
            .await?;
        let found: BTreeSet<CategoryId> = found.into_iter().map(|(id,)| id).collect();

        match ids.into_iter().find(|id| !found.contains(id)) {
            Some(id) => Err(StoreError::InvalidReference {
                entity: "category",
                id,
            }),
            None => Ok(()),
        }
    }

    async fn replace_categories(
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
        categories: &BTreeSet<CategoryId>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM event_categories WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut **tx)
            .await?;

        let ids: Vec<CategoryId> = categories.iter().copied().collect();
        sqlx::query(
            "INSERT INTO event_categories (event_id, category_id) \
             SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(event_id)
        .bind(&ids)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn create_user(&self, username: &str) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username) VALUES ($1) RETURNING id, username, created_at",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_user(&self, id: UserId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::NotFound { entity: "user", id }),
            Ok(_) => Ok(()),
            Err(err) if is_foreign_key_violation(&err) => {
                let (events,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM events WHERE organizer_id = $1")
                        .bind(id)
                        .fetch_one(&self.pool)
                        .await?;
                Err(StoreError::ReferentialIntegrity {
                    user_id: id,
                    events: usize::try_from(events).unwrap_or_default(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn create_category(&self, name: &str) -> Result<Category, StoreError> {
        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name) VALUES ($1) \
             RETURNING id, name, created_at, updated_at",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(category)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT id, name, created_at, updated_at FROM categories ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn create_event(&self, new: NewEvent) -> Result<Event, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::check_categories(&mut tx, &new.categories).await?;

        let inserted = sqlx::query_as::<_, EventRow>(&format!(
            "INSERT INTO events (title, organizer_id, status, place, \"timestamp\", description, capacity) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {EVENT_COLUMNS}"
        ))
        .bind(&new.title)
        .bind(new.organizer)
        .bind(new.status.as_str())
        .bind(&new.place)
        .bind(new.timestamp)
        .bind(&new.description)
        .bind(new.capacity)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(StoreError::InvalidReference {
                    entity: "user",
                    id: new.organizer,
                })
            }
            Err(err) => return Err(err.into()),
        };

        Self::replace_categories(&mut tx, row.id, &new.categories).await?;
        tx.commit().await?;

        tracing::debug!(event_id = row.id, "Inserted event");
        row.into_event(new.categories, BTreeSet::new())
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY \"timestamp\" DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn update_event(&self, id: EventId, changes: EventChanges) -> Result<Event, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::check_categories(&mut tx, &changes.categories).await?;

        // Registrations on this event wait for the commit.
        let locked: Option<(EventId,)> =
            sqlx::query_as("SELECT id FROM events WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::event_not_found(id));
        }

        let (attendees,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM event_attendees WHERE event_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        check_capacity(changes.capacity, usize::try_from(attendees).unwrap_or_default())?;

        let row = sqlx::query_as::<_, EventRow>(&format!(
            "UPDATE events SET title = $2, status = $3, place = $4, \"timestamp\" = $5, \
             description = $6, capacity = $7, updated_at = NOW() \
             WHERE id = $1 RETURNING {EVENT_COLUMNS}"
        ))
        .bind(id)
        .bind(&changes.title)
        .bind(changes.status.as_str())
        .bind(&changes.place)
        .bind(changes.timestamp)
        .bind(&changes.description)
        .bind(changes.capacity)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::event_not_found(id))?;

        Self::replace_categories(&mut tx, id, &changes.categories).await?;
        tx.commit().await?;

        self.hydrate(vec![row])
            .await?
            .pop()
            .ok_or_else(|| StoreError::event_not_found(id))
    }

    async fn add_attendee(&self, event_id: EventId, user_id: UserId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO event_attendees (event_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_foreign_key_violation(&err) => {
                match self.get_event(event_id).await? {
                    None => Err(StoreError::event_not_found(event_id)),
                    Some(_) => Err(StoreError::InvalidReference {
                        entity: "user",
                        id: user_id,
                    }),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_attendee(&self, event_id: EventId, user_id: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM event_attendees WHERE event_id = $1 AND user_id = $2")
            .bind(event_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_attendees(&self, event_id: EventId) -> Result<usize, StoreError> {
        let (exists, count): (bool, i64) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM events WHERE id = $1), \
             (SELECT COUNT(*) FROM event_attendees WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            return Err(StoreError::event_not_found(event_id));
        }
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn apply_registration(
        &self,
        event_id: EventId,
        user_id: UserId,
        action: RegistrationAction,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes registrations on the same event until commit.
        let locked: Option<(DateTime<Utc>, String, Option<i32>)> = sqlx::query_as(
            "SELECT \"timestamp\", status, capacity FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (timestamp, status, capacity) =
            locked.ok_or_else(|| StoreError::event_not_found(event_id))?;

        let (attendee_count, is_attending): (i64, bool) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(BOOL_OR(user_id = $2), FALSE) \
             FROM event_attendees WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let snapshot = RegistrationSnapshot {
            timestamp,
            status: status
                .parse::<EventStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            capacity,
            attendee_count: usize::try_from(attendee_count).unwrap_or_default(),
            is_attending,
        };

        let statement = match registration::evaluate(action, &snapshot, now)? {
            Transition::AddAttendee => {
                "INSERT INTO event_attendees (event_id, user_id) VALUES ($1, $2)"
            }
            Transition::RemoveAttendee => {
                "DELETE FROM event_attendees WHERE event_id = $1 AND user_id = $2"
            }
        };
        let written = sqlx::query(statement)
            .bind(event_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await;
        match written {
            Ok(_) => {}
            // The event row is locked, so only the user can be missing.
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(StoreError::InvalidReference {
                    entity: "user",
                    id: user_id,
                })
            }
            Err(err) => return Err(err.into()),
        }

        tx.commit().await?;
        Ok(())
    }
}
