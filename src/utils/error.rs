use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, info};

use crate::events::policy::Forbidden;
use crate::events::query::QueryError;
use crate::events::registration::RegistrationError;
use crate::events::FieldError;
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    /// Business-rule or input violation; `detail` is the machine-readable code.
    #[error("Validation error: {detail}")]
    Validation {
        detail: String,
        field: Option<String>,
    },

    #[error("Authentication error: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid page: {0}")]
    InvalidPage(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn validation(detail: impl Into<String>) -> Self {
        AppError::Validation {
            detail: detail.into(),
            field: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::InvalidPage(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &str {
        match self {
            AppError::Validation { detail, .. } => detail.as_str(),
            AppError::Unauthenticated(_) => "NOT_AUTHENTICATED",
            AppError::Forbidden(_) => "PERMISSION_DENIED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidPage(_) => "INVALID_PAGE",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::Validation { detail, field } => {
                info!(detail = %detail, field = ?field, "Request rejected");
            }
            AppError::Unauthenticated(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidPage(msg) => {
                info!(status = %self.status_code(), message = %msg, "Request rejected");
            }
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl From<FieldError> for AppError {
    fn from(err: FieldError) -> Self {
        AppError::Validation {
            detail: err.code.to_string(),
            field: Some(err.field),
        }
    }
}

impl From<RegistrationError> for AppError {
    fn from(err: RegistrationError) -> Self {
        AppError::validation(err.code())
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidParameter(field) => field.into(),
            QueryError::InvalidPage(page) => AppError::InvalidPage(page),
        }
    }
}

impl From<Forbidden> for AppError {
    fn from(err: Forbidden) -> Self {
        AppError::Forbidden(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            StoreError::Rejected(rejection) => rejection.into(),
            StoreError::InvalidReference { entity, .. } => AppError::Validation {
                detail: "INVALID_REFERENCE".to_string(),
                field: Some(entity.to_string()),
            },
            StoreError::CapacityBelowAttendance { .. } => AppError::Validation {
                detail: "INVALID_EVENT_DATA".to_string(),
                field: Some("capacity".to_string()),
            },
            StoreError::Database(e) => AppError::DatabaseError(e),
            StoreError::ReferentialIntegrity { .. } | StoreError::Corrupt(_) => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log internal details
        self.log();

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        // Do not expose internal details in the API response
        error_response(self.code(), field, status)
    }
}
