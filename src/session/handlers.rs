use axum::{extract::State, Extension, Json};
use tracing::{info, instrument, warn};

use super::types::{
    LoginRequest, LoginResponse, MessageResponse, RefreshRequest, RegisterRequest,
    RegisterResponse, TokenClaims, TokenPair,
};
use crate::shared::{AppError, AppState};
use crate::user::{UserRepository, UserResponse};

/// POST /auth/register
#[instrument(name = "register", skip(state, request))]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let user = state.session_service.register(request).await?;

    Ok(Json(RegisterResponse {
        message: "User registered successfully".to_string(),
        user,
    }))
}

/// POST /auth/login
#[instrument(name = "login", skip(state, request))]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let outcome = state.session_service.login(request).await?;

    Ok(Json(LoginResponse {
        message: "User logged in successfully".to_string(),
        user: outcome.user,
        access_token: outcome.tokens.access_token,
        refresh_token: outcome.tokens.refresh_token,
    }))
}

/// POST /auth/logout
///
/// A token that is no longer listed means the session is already gone, so
/// that case answers 200 rather than an error.
#[instrument(name = "logout", skip(state, request))]
pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let message = match state.session_service.logout(request).await {
        Ok(()) => "User logged out successfully",
        Err(AppError::InvalidRefreshToken) => {
            warn!("Logout with a refresh token that is no longer active");
            "User already logged out"
        }
        Err(e) => return Err(e),
    };

    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

/// POST /auth/refresh
#[instrument(name = "refresh", skip(state, request))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let tokens = state.session_service.refresh(request).await?;
    info!("Token refreshed");
    Ok(Json(tokens))
}

/// GET /auth/me, behind [`super::jwt_auth`]
#[instrument(name = "me", skip(state, claims))]
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .user_repository
        .find_by_id(&claims.sub)
        .await?
        .ok_or_else(|| AppError::IdentityNotFound(claims.sub.clone()))?;

    Ok(Json(user.into()))
}
