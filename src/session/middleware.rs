use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{info, instrument, warn};

use crate::shared::{AppError, AppState};

/// Access-token middleware - validates the Authorization Bearer header and adds TokenClaims to the request.
/// Usage: .layer(middleware::from_fn_with_state(app_state.clone(), session::jwt_auth))
/// Handlers can then extract Extension(claims): Extension<TokenClaims>.
///
/// Only the signature and expiry are checked; access tokens are never stored.
#[instrument(skip(state, req, next))]
pub async fn jwt_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| {
            warn!("Missing Authorization header in request");
            AppError::InvalidToken("missing Authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        warn!("Invalid Authorization header format (expected Bearer token)");
        AppError::InvalidToken("expected Bearer token".to_string())
    })?;

    let claims = match state.session_service.token_codec().verify(token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Access token rejected: {}", e);
            return Err(e);
        }
    };

    info!(user_id = %claims.sub, "Authentication successful, adding claims to request");

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
