//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::auth_middleware;
use crate::handlers::auth;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler));

    // Protected routes (valid, unrevoked bearer token required)
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/logout-all", post(auth::logout_all_handler))
        .route("/auth/me", get(auth::me_handler))
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
