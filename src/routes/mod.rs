use axum::routing::{get, post};
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::categories::{create_category, list_categories};
use crate::handlers::events::{
    create_event, list_events, register, retrieve_event, unregister, update_event,
};
use crate::handlers::health_check;
use crate::state::AppState;

/// Resource routes without middleware.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/events/", get(list_events).post(create_event))
        .route("/events/:id/", get(retrieve_event).put(update_event))
        .route("/events/:id/register/", post(register))
        .route("/events/:id/un-register/", post(unregister))
        .route("/categories/", get(list_categories).post(create_category))
}

pub fn create_routes(state: AppState, config: &Config) -> Router {
    let router = api_routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    create_security_headers_layer(config.production)
        .apply(router)
        .layer(create_cors_layer(&config.allowed_origins))
}
