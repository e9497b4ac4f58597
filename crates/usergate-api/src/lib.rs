//! usergate API - authentication and session revocation service
//!
//! Issues and verifies session tokens, keeps a revocation list in a shared
//! key-value store and throttles brute-force login attempts. The HTTP surface
//! is a thin axum layer over [`auth::AuthService`].
//!
//! Author: hephaex@gmail.com

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "usergate API",
        version = "0.1.0",
        description = "Authentication, token revocation and brute-force protection"
    ),
    paths(
        handlers::auth::login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::logout_all_handler,
        handlers::auth::me_handler,
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::health::metrics_handler,
    ),
    components(schemas(
        handlers::auth::LoginRequest,
        handlers::auth::RefreshRequest,
        handlers::auth::TokenResponse,
        handlers::auth::LogoutResponse,
        handlers::auth::MeResponse,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        error::ApiError,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Login, refresh and logout"),
        (name = "health", description = "Probes and metrics")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(audit::SESSION_ID_HEADER),
        ])
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::xss_filter_middleware,
        ))
        .layer(axum_middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
