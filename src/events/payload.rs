//! Client-supplied bodies for creating and updating events and categories.
//!
//! Server-controlled fields (`id`, `organizer`, `attendees`, `created_at`,
//! `updated_at`) are not part of these types, so whatever the client sends for
//! them is dropped during deserialization.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{parse_timestamp, FieldError};
use crate::models::{CategoryId, Event, EventChanges, EventStatus, NewEvent, UserId};

pub const MAX_TEXT_LENGTH: usize = 255;

const INVALID_EVENT_DATA: &str = "INVALID_EVENT_DATA";
const INVALID_CATEGORY_DATA: &str = "INVALID_CATEGORY_DATA";

/// Distinguishes an explicit `null` from a missing key.
fn explicit_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    pub title: Option<String>,
    pub status: Option<String>,
    pub place: Option<String>,
    pub timestamp: Option<String>,
    pub description: Option<String>,
    pub categories: Option<Vec<CategoryId>>,
    #[serde(default, deserialize_with = "explicit_option")]
    pub capacity: Option<Option<i64>>,
}

/// Trimmed, non-blank text of at most [`MAX_TEXT_LENGTH`] characters.
fn required_text(value: Option<&str>, field: &str) -> Result<String, FieldError> {
    let value = value.unwrap_or_default().trim();
    if value.is_empty() || value.chars().count() > MAX_TEXT_LENGTH {
        return Err(FieldError::new(INVALID_EVENT_DATA, field));
    }
    Ok(value.to_string())
}

impl EventPayload {
    /// Deserializes a JSON body, reporting type mismatches as validation errors.
    pub fn from_json(body: Value) -> Result<Self, FieldError> {
        if !body.is_object() {
            return Err(FieldError::new(INVALID_EVENT_DATA, "non_field_errors"));
        }
        serde_json::from_value(body).map_err(|e| {
            tracing::debug!(error = %e, "Rejected event payload");
            FieldError::new(INVALID_EVENT_DATA, "non_field_errors")
        })
    }

    fn title(&self) -> Result<String, FieldError> {
        required_text(self.title.as_deref(), "title")
    }

    fn place(&self) -> Result<String, FieldError> {
        required_text(self.place.as_deref(), "place")
    }

    fn timestamp(&self) -> Result<chrono::DateTime<chrono::Utc>, FieldError> {
        self.timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or_else(|| FieldError::new(INVALID_EVENT_DATA, "timestamp"))
    }

    fn status(&self) -> Result<Option<EventStatus>, FieldError> {
        self.status
            .as_deref()
            .map(|s| {
                s.parse()
                    .map_err(|_| FieldError::new(INVALID_EVENT_DATA, "status"))
            })
            .transpose()
    }

    fn capacity(&self) -> Result<Option<Option<i32>>, FieldError> {
        match self.capacity {
            None => Ok(None),
            Some(None) => Ok(Some(None)),
            Some(Some(capacity)) => i32::try_from(capacity)
                .ok()
                .filter(|c| *c >= 1)
                .map(|c| Some(Some(c)))
                .ok_or_else(|| FieldError::new(INVALID_EVENT_DATA, "capacity")),
        }
    }

    fn categories(&self) -> Option<BTreeSet<CategoryId>> {
        self.categories
            .as_ref()
            .map(|ids| ids.iter().copied().collect())
    }

    /// Validates a creation body. The requester becomes the organizer.
    pub fn into_new_event(self, organizer: UserId) -> Result<NewEvent, FieldError> {
        Ok(NewEvent {
            title: self.title()?,
            organizer,
            status: self.status()?.unwrap_or_default(),
            place: self.place()?,
            timestamp: self.timestamp()?,
            description: self.description.clone().unwrap_or_default(),
            categories: self.categories().unwrap_or_default(),
            capacity: self.capacity()?.flatten(),
        })
    }

    /// Validates a full-update body against the stored event. Required fields
    /// must be present; omitted optional fields keep their stored values.
    pub fn into_changes(self, current: &Event) -> Result<EventChanges, FieldError> {
        Ok(EventChanges {
            title: self.title()?,
            status: self.status()?.unwrap_or(current.status),
            place: self.place()?,
            timestamp: self.timestamp()?,
            description: self
                .description
                .clone()
                .unwrap_or_else(|| current.description.clone()),
            categories: self
                .categories()
                .unwrap_or_else(|| current.categories.clone()),
            capacity: self.capacity()?.unwrap_or(current.capacity),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryPayload {
    pub name: Option<String>,
}

impl CategoryPayload {
    pub fn from_json(body: Value) -> Result<String, FieldError> {
        let payload: CategoryPayload = serde_json::from_value(body)
            .map_err(|_| FieldError::new(INVALID_CATEGORY_DATA, "non_field_errors"))?;
        let name = payload.name.unwrap_or_default();
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_TEXT_LENGTH {
            return Err(FieldError::new(INVALID_CATEGORY_DATA, "name"));
        }
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn minimum_valid() -> Value {
        json!({
            "title": "Test event",
            "place": "Any place",
            "timestamp": "2050-12-30T00:00:01.973Z",
        })
    }

    fn stored() -> Event {
        let at = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        Event {
            id: 4,
            title: "old".to_string(),
            organizer: Some(1),
            status: EventStatus::Hidden,
            place: "old place".to_string(),
            timestamp: at,
            description: "kept".to_string(),
            categories: BTreeSet::from([5]),
            capacity: Some(10),
            attendees: BTreeSet::from([2]),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_minimum_valid_body() {
        let new = EventPayload::from_json(minimum_valid())
            .unwrap()
            .into_new_event(7)
            .unwrap();

        assert_eq!(new.organizer, 7);
        assert_eq!(new.status, EventStatus::Published);
        assert_eq!(new.description, "");
        assert!(new.categories.is_empty());
        assert_eq!(new.capacity, None);
    }

    #[test]
    fn test_client_organizer_is_ignored() {
        let mut body = minimum_valid();
        body["organizer"] = json!(99);
        body["attendees"] = json!([99]);
        body["id"] = json!(1000);

        let new = EventPayload::from_json(body)
            .unwrap()
            .into_new_event(7)
            .unwrap();
        assert_eq!(new.organizer, 7);
    }

    #[test]
    fn test_required_fields() {
        for field in ["title", "place", "timestamp"] {
            let mut body = minimum_valid();
            body.as_object_mut().unwrap().remove(field);
            let err = EventPayload::from_json(body)
                .unwrap()
                .into_new_event(1)
                .unwrap_err();
            assert_eq!(err.field, field);
        }

        let mut body = minimum_valid();
        body["title"] = json!("   ");
        let err = EventPayload::from_json(body)
            .unwrap()
            .into_new_event(1)
            .unwrap_err();
        assert_eq!(err.field, "title");
    }

    #[test]
    fn test_text_fields_are_trimmed() {
        let mut body = minimum_valid();
        body["title"] = json!("  Rust meetup \n");
        body["place"] = json!("\tAthens ");
        let new = EventPayload::from_json(body)
            .unwrap()
            .into_new_event(1)
            .unwrap();

        assert_eq!(new.title, "Rust meetup");
        assert_eq!(new.place, "Athens");
    }

    #[test]
    fn test_capacity_must_be_positive() {
        let mut body = minimum_valid();
        body["capacity"] = json!(0);
        let err = EventPayload::from_json(body)
            .unwrap()
            .into_new_event(1)
            .unwrap_err();
        assert_eq!(err, FieldError::new(INVALID_EVENT_DATA, "capacity"));
    }

    #[test]
    fn test_wrong_types_are_validation_errors() {
        let mut body = minimum_valid();
        body["capacity"] = json!("many");
        assert!(EventPayload::from_json(body).is_err());
        assert!(EventPayload::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_update_keeps_omitted_optional_fields() {
        let changes = EventPayload::from_json(minimum_valid())
            .unwrap()
            .into_changes(&stored())
            .unwrap();

        assert_eq!(changes.title, "Test event");
        assert_eq!(changes.status, EventStatus::Hidden);
        assert_eq!(changes.description, "kept");
        assert_eq!(changes.categories, BTreeSet::from([5]));
        assert_eq!(changes.capacity, Some(10));
    }

    #[test]
    fn test_update_null_capacity_clears_limit() {
        let mut body = minimum_valid();
        body["capacity"] = Value::Null;
        body["status"] = json!("PUBLISHED");
        let changes = EventPayload::from_json(body)
            .unwrap()
            .into_changes(&stored())
            .unwrap();

        assert_eq!(changes.capacity, None);
        assert_eq!(changes.status, EventStatus::Published);
    }

    #[test]
    fn test_empty_update_body_is_rejected() {
        let err = EventPayload::from_json(json!({}))
            .unwrap()
            .into_changes(&stored())
            .unwrap_err();
        assert_eq!(err.code, INVALID_EVENT_DATA);
    }

    #[test]
    fn test_category_name() {
        assert_eq!(
            CategoryPayload::from_json(json!({"name": "music"})).unwrap(),
            "music"
        );
        assert_eq!(
            CategoryPayload::from_json(json!({"name": " jazz "})).unwrap(),
            "jazz"
        );
        assert!(CategoryPayload::from_json(json!({"name": ""})).is_err());
        assert!(CategoryPayload::from_json(json!({})).is_err());
    }
}
