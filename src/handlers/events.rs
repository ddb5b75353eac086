use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::Uri;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::events::payload::EventPayload;
use crate::events::policy::{authorize, EventAction};
use crate::events::query::{query_events, EventFilter};
use crate::models::{EventId, EventResponse};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, no_content, ok, PageBody};

fn parse_event_id(raw: &str) -> Result<EventId, AppError> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("Event with id '{}' was not found", raw)))
}

fn malformed(_: JsonRejection) -> AppError {
    AppError::validation("MALFORMED_REQUEST")
}

fn malformed_query(rejection: QueryRejection) -> AppError {
    tracing::debug!(error = %rejection, "Rejected query string");
    AppError::validation("INVALID_QUERY_PARAMETER")
}

/// Link to another page of the same listing, keeping every other parameter.
fn page_link(path: &str, params: &[(String, String)], page: usize) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in params.iter().filter(|(name, _)| name != "page") {
        query.append_pair(name, value);
    }
    if page > 1 {
        query.append_pair("page", &page.to_string());
    }

    let query = query.finish();
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    }
}

pub async fn list_events(
    State(state): State<AppState>,
    user: AuthUser,
    uri: Uri,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Response, AppError> {
    authorize(EventAction::List, user.id, None)?;
    let Query(params) = query.map_err(malformed_query)?;
    let filter = EventFilter::from_params(&params)?;

    let events = state.store.list_events().await?;
    let page = query_events(events, &filter, user.id, Utc::now())?;

    let next = page
        .has_next()
        .then(|| page_link(uri.path(), &params, page.page + 1));
    let previous = page
        .has_previous()
        .then(|| page_link(uri.path(), &params, page.page - 1));
    let page = page.map(EventResponse::from);

    Ok(ok(PageBody {
        count: page.count,
        next,
        previous,
        results: page.results,
    }))
}

pub async fn retrieve_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_event_id(&id)?;
    let event = state
        .store
        .get_event(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", id)))?;
    authorize(EventAction::Retrieve, user.id, Some(&event))?;

    Ok(ok(EventResponse::from(event)))
}

pub async fn create_event(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    authorize(EventAction::Create, user.id, None)?;
    let Json(body) = body.map_err(malformed)?;
    let new_event = EventPayload::from_json(body)?.into_new_event(user.id)?;

    let event = state.store.create_event(new_event).await?;
    tracing::info!(event_id = event.id, organizer = user.id, "Event created");
    Ok(created(EventResponse::from(event)))
}

pub async fn update_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parse_event_id(&id)?;
    let event = state
        .store
        .get_event(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", id)))?;
    authorize(EventAction::Update, user.id, Some(&event))?;

    let Json(body) = body.map_err(malformed)?;
    let changes = EventPayload::from_json(body)?.into_changes(&event)?;

    let updated = state.store.update_event(id, changes).await?;
    tracing::info!(event_id = id, user_id = user.id, "Event updated");
    Ok(ok(EventResponse::from(updated)))
}

pub async fn register(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    authorize(EventAction::Register, user.id, None)?;
    let id = parse_event_id(&id)?;

    state.store.register(id, user.id, Utc::now()).await?;
    tracing::info!(event_id = id, user_id = user.id, "User registered to event");
    Ok(no_content())
}

pub async fn unregister(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    authorize(EventAction::Unregister, user.id, None)?;
    let id = parse_event_id(&id)?;

    state.store.unregister(id, user.id, Utc::now()).await?;
    tracing::info!(event_id = id, user_id = user.id, "User un-registered from event");
    Ok(no_content())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_page_link_replaces_page() {
        let params = params(&[("page", "2"), ("search", "rust meetup"), ("only_mine", "true")]);

        assert_eq!(
            page_link("/events/", &params, 3),
            "/events/?search=rust+meetup&only_mine=true&page=3"
        );
        assert_eq!(
            page_link("/events/", &params, 1),
            "/events/?search=rust+meetup&only_mine=true"
        );
    }

    #[test]
    fn test_page_link_without_params() {
        assert_eq!(page_link("/events/", &[], 2), "/events/?page=2");
        assert_eq!(page_link("/events/", &[], 1), "/events/");
    }

    #[test]
    fn test_query_rejection_uses_error_body() {
        let uri: Uri = "/events/?page=x".parse().unwrap();
        let rejection = Query::<std::collections::HashMap<String, u32>>::try_from_uri(&uri)
            .unwrap_err();

        let err = malformed_query(rejection);
        assert_eq!(err.code(), "INVALID_QUERY_PARAMETER");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_non_numeric_id_is_not_found() {
        assert!(matches!(parse_event_id("abc"), Err(AppError::NotFound(_))));
        assert_eq!(parse_event_id("12").unwrap(), 12);
    }
}
