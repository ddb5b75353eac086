use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::events::payload::CategoryPayload;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, ok};

pub async fn list_categories(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Response, AppError> {
    let categories = state.store.list_categories().await?;
    Ok(ok(categories))
}

pub async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body.map_err(|_| AppError::validation("MALFORMED_REQUEST"))?;
    let name = CategoryPayload::from_json(body)?;

    let category = state.store.create_category(&name).await?;
    tracing::info!(category_id = category.id, user_id = user.id, "Category created");
    Ok(created(category))
}
