//! Filtering, searching, ordering and pagination of the event listing.
//!
//! [`EventFilter::from_params`] turns raw query parameters into a typed filter
//! and [`query_events`] applies it to a snapshot of all events. Neither touches
//! the store.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{parse_timestamp, FieldError};
use crate::models::{Event, EventStatus, UserId};

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 100;

const INVALID_QUERY_PARAMETER: &str = "INVALID_QUERY_PARAMETER";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    InvalidParameter(#[from] FieldError),

    #[error("page {0} does not exist")]
    InvalidPage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    Id,
    Title,
    Organizer,
    Status,
    Place,
    Timestamp,
    Description,
    Capacity,
    CreatedAt,
    UpdatedAt,
}

impl OrderField {
    fn parse(name: &str) -> Option<Self> {
        let field = match name {
            "id" => OrderField::Id,
            "title" => OrderField::Title,
            "organizer" => OrderField::Organizer,
            "status" => OrderField::Status,
            "place" => OrderField::Place,
            "timestamp" => OrderField::Timestamp,
            "description" => OrderField::Description,
            "capacity" => OrderField::Capacity,
            "created_at" => OrderField::CreatedAt,
            "updated_at" => OrderField::UpdatedAt,
            _ => return None,
        };
        Some(field)
    }

    fn compare(self, a: &Event, b: &Event) -> Ordering {
        match self {
            OrderField::Id => a.id.cmp(&b.id),
            OrderField::Title => a.title.cmp(&b.title),
            OrderField::Organizer => a.organizer.cmp(&b.organizer),
            OrderField::Status => a.status.as_str().cmp(b.status.as_str()),
            OrderField::Place => a.place.cmp(&b.place),
            OrderField::Timestamp => a.timestamp.cmp(&b.timestamp),
            OrderField::Description => a.description.cmp(&b.description),
            OrderField::Capacity => a.capacity.cmp(&b.capacity),
            OrderField::CreatedAt => a.created_at.cmp(&b.created_at),
            OrderField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub field: OrderField,
    pub descending: bool,
}

impl OrderKey {
    fn compare(&self, a: &Event, b: &Event) -> Ordering {
        let ordering = self.field.compare(a, b);
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn default_ordering() -> Vec<OrderKey> {
    vec![OrderKey {
        field: OrderField::Timestamp,
        descending: true,
    }]
}

/// Recognized listing options. Unset options do not filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub only_mine: bool,
    pub only_future: bool,
    pub only_past: bool,
    pub status: Option<EventStatus>,
    pub organizer: Option<UserId>,
    pub timestamp: Option<DateTime<Utc>>,
    pub timestamp_gte: Option<DateTime<Utc>>,
    pub timestamp_lte: Option<DateTime<Utc>>,
    pub search_terms: Vec<String>,
    pub ordering: Vec<OrderKey>,
    pub page: usize,
    pub page_size: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            only_mine: false,
            only_future: false,
            only_past: false,
            status: None,
            organizer: None,
            timestamp: None,
            timestamp_gte: None,
            timestamp_lte: None,
            search_terms: Vec::new(),
            ordering: default_ordering(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, FieldError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(FieldError::new(INVALID_QUERY_PARAMETER, name)),
    }
}

fn parse_time(name: &str, value: &str) -> Result<DateTime<Utc>, FieldError> {
    parse_timestamp(value).ok_or_else(|| FieldError::new(INVALID_QUERY_PARAMETER, name))
}

fn parse_ordering(value: &str) -> Vec<OrderKey> {
    let keys: Vec<OrderKey> = value
        .split(',')
        .map(str::trim)
        .filter_map(|term| {
            let (descending, name) = match term.strip_prefix('-') {
                Some(name) => (true, name),
                None => (false, term),
            };
            OrderField::parse(name).map(|field| OrderKey { field, descending })
        })
        .collect();

    if keys.is_empty() {
        default_ordering()
    } else {
        keys
    }
}

fn parse_page_size(value: &str) -> usize {
    match value.parse::<usize>() {
        Ok(0) | Err(_) => DEFAULT_PAGE_SIZE,
        Ok(size) => size.min(MAX_PAGE_SIZE),
    }
}

impl EventFilter {
    /// Builds a filter from query parameters; later duplicates win and empty
    /// values are treated as absent.
    pub fn from_params(params: &[(String, String)]) -> Result<Self, QueryError> {
        let mut filter = EventFilter::default();

        for (name, value) in params {
            let value = value.as_str();
            if value.is_empty() {
                continue;
            }

            match name.as_str() {
                "only_mine" => filter.only_mine = parse_flag(name, value)?,
                "only_future" => filter.only_future = parse_flag(name, value)?,
                "only_past" => filter.only_past = parse_flag(name, value)?,
                "status" => {
                    let status = value
                        .parse::<EventStatus>()
                        .map_err(|_| FieldError::new(INVALID_QUERY_PARAMETER, name))?;
                    filter.status = Some(status);
                }
                "organizer" => {
                    let organizer = value
                        .parse::<UserId>()
                        .map_err(|_| FieldError::new(INVALID_QUERY_PARAMETER, name))?;
                    filter.organizer = Some(organizer);
                }
                "timestamp" => filter.timestamp = Some(parse_time(name, value)?),
                "timestamp__gte" => filter.timestamp_gte = Some(parse_time(name, value)?),
                "timestamp__lte" => filter.timestamp_lte = Some(parse_time(name, value)?),
                "search" => {
                    filter.search_terms = value
                        .split(|c: char| c.is_whitespace() || c == ',')
                        .filter(|term| !term.is_empty())
                        .map(str::to_lowercase)
                        .collect();
                }
                "ordering" => filter.ordering = parse_ordering(value),
                "page" => {
                    filter.page = match value.parse::<usize>() {
                        Ok(page) if page >= 1 => page,
                        _ => return Err(QueryError::InvalidPage(value.to_string())),
                    };
                }
                "page_size" => filter.page_size = parse_page_size(value),
                _ => {}
            }
        }

        Ok(filter)
    }

    /// Whether `event` belongs in the result set for `principal` at `now`.
    pub fn matches(&self, event: &Event, principal: UserId, now: DateTime<Utc>) -> bool {
        if self.only_mine && !event.is_organized_by(principal) {
            return false;
        }

        if self.only_future {
            if event.timestamp <= now {
                return false;
            }
        } else if self.only_past && event.timestamp > now {
            return false;
        }

        if self.status.is_some_and(|status| event.status != status) {
            return false;
        }
        if self.organizer.is_some() && event.organizer != self.organizer {
            return false;
        }
        if self.timestamp.is_some_and(|at| event.timestamp != at) {
            return false;
        }
        if self.timestamp_gte.is_some_and(|at| event.timestamp < at) {
            return false;
        }
        if self.timestamp_lte.is_some_and(|at| event.timestamp > at) {
            return false;
        }

        self.matches_search(event)
    }

    fn matches_search(&self, event: &Event) -> bool {
        if self.search_terms.is_empty() {
            return true;
        }

        let fields = [
            event.place.to_lowercase(),
            event.title.to_lowercase(),
            event.description.to_lowercase(),
        ];
        self.search_terms
            .iter()
            .all(|term| fields.iter().any(|field| field.contains(term.as_str())))
    }

    fn compare(&self, a: &Event, b: &Event) -> Ordering {
        self.ordering
            .iter()
            .map(|key| key.compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| b.id.cmp(&a.id))
    }
}

/// One page of a filtered listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub count: usize,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.page * self.page_size < self.count
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            page: self.page,
            page_size: self.page_size,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

pub fn query_events(
    events: Vec<Event>,
    filter: &EventFilter,
    principal: UserId,
    now: DateTime<Utc>,
) -> Result<Page<Event>, QueryError> {
    let mut matched: Vec<Event> = events
        .into_iter()
        .filter(|event| filter.matches(event, principal, now))
        .collect();
    matched.sort_by(|a, b| filter.compare(a, b));

    let count = matched.len();
    let page_size = filter.page_size.clamp(1, MAX_PAGE_SIZE);
    let last_page = count.div_ceil(page_size).max(1);
    if filter.page > last_page {
        return Err(QueryError::InvalidPage(filter.page.to_string()));
    }

    let results = matched
        .into_iter()
        .skip((filter.page - 1) * page_size)
        .take(page_size)
        .collect();

    Ok(Page {
        count,
        page: filter.page,
        page_size,
        results,
    })
}
