use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::session;
use crate::shared::AppState;

/// Builds the HTTP surface for the session endpoints
pub fn router(app_state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(session::me))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            session::jwt_auth,
        ));

    Router::new()
        .route("/auth/register", post(session::register))
        .route("/auth/login", post(session::login))
        .route("/auth/logout", post(session::logout))
        .route("/auth/refresh", post(session::refresh))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
