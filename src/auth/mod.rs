//! Principal extraction. Every events endpoint takes an [`AuthUser`], so an
//! unauthenticated request is answered with 401 before any handler runs.

pub mod jwt;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

pub use jwt::JwtService;

use crate::models::UserId;
use crate::state::AppState;
use crate::utils::error::AppError;

/// Accepted `Authorization` schemes.
const AUTH_SCHEMES: [&str; 2] = ["Bearer ", "JWT "];

/// The authenticated principal of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| {
            AppError::Unauthenticated("Authentication credentials were not provided".to_string())
        })?
        .to_str()
        .map_err(|_| AppError::Unauthenticated("Invalid authorization header".to_string()))?;

    AUTH_SCHEMES
        .iter()
        .find_map(|scheme| value.strip_prefix(scheme))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("Unsupported authorization scheme".to_string()))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let user_id = state.jwt.validate_access_token(token).map_err(|e| {
            tracing::debug!("JWT validation failed: {}", e);
            AppError::Unauthenticated("Invalid or expired token".to_string())
        })?;

        // Tokens outlive accounts; a deleted user is no principal.
        if state.store.get_user(user_id).await?.is_none() {
            return Err(AppError::Unauthenticated("User not found".to_string()));
        }

        Ok(AuthUser { id: user_id })
    }
}
