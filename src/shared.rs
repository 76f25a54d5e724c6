use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::session::service::SessionService;
use crate::user::repository::UserRepository;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub user_repository: Arc<dyn UserRepository + Send + Sync>,
    pub session_service: Arc<SessionService>,
}

impl AppState {
    pub fn new(
        user_repository: Arc<dyn UserRepository + Send + Sync>,
        session_service: Arc<SessionService>,
    ) -> Self {
        Self {
            user_repository,
            session_service,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Identity already exists: {0}")]
    DuplicateIdentity(String),

    /// Covers both an unknown email and a wrong secret
    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MissingField(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateIdentity(_) => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::InvalidToken(_)
            | AppError::InvalidRefreshToken => StatusCode::UNAUTHORIZED,
            AppError::IdentityNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Configuration(_) | AppError::DatabaseError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error_message = match &self {
            // Don't leak store or key details to clients
            AppError::Configuration(_) | AppError::DatabaseError(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
