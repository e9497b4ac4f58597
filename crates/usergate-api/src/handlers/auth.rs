//! Authentication API handlers
//!
//! Author: hephaex@gmail.com

use crate::audit::ClientInfo;
use crate::auth::{AuthenticatedUser, IssuedToken};
use crate::error::{ApiError, AppError};
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 255))]
    pub login: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub token: String,
}

/// Issued session token with the identity it carries
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: String,
    pub user_id: String,
    pub login: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// Expiry, Unix epoch milliseconds
    pub expires_at: i64,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        let expires_at = issued.claims.expires_at_ms();
        Self {
            token: issued.token,
            token_type: "Bearer".to_string(),
            user_id: issued.claims.sub,
            login: issued.claims.login,
            roles: issued.claims.roles.into_iter().collect(),
            permissions: issued.claims.permissions.into_iter().collect(),
            expires_at,
        }
    }
}

/// Logout response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Claims of the presented token
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub user_id: String,
    pub login: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// Unix epoch seconds
    pub issued_at: i64,
    /// Unix epoch seconds
    pub expires_at: i64,
}

fn validated<T: Validate>(request: &T) -> Result<(), AppError> {
    request
        .validate()
        .map_err(|_| AppError::BadRequest("Invalid request body".to_string()))
}

/// Login with login name and password
///
/// Repeated failures block the caller's IP or the login for an escalating
/// period; blocked attempts answer 429 without checking the password.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ApiError),
        (status = 429, description = "Too many failed attempts", body = ApiError),
        (status = 503, description = "Dependency unavailable", body = ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    validated(&request)?;

    let issued = state
        .auth
        .authenticate(&request.login, &request.password, &client)
        .await?;

    Ok(Json(TokenResponse::from(issued)))
}

/// Exchange a valid token for one with a fresh validity window
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = TokenResponse),
        (status = 401, description = "Invalid, expired or revoked token", body = ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    validated(&request)?;

    let issued = state.auth.refresh_token(&request.token, &client).await?;

    Ok(Json(TokenResponse::from(issued)))
}

/// Revoke the presented token
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 400, description = "Token does not belong to the user", body = ApiError),
        (status = 401, description = "Not authenticated", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .logout(&user.token, user.user_id(), &user.client)
        .await?;

    Ok(Json(LogoutResponse {
        message: "Logged out".to_string(),
    }))
}

/// Record a "log out everywhere" marker for the caller
///
/// Tokens already issued keep validating until they expire.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    tag = "auth",
    responses(
        (status = 200, description = "Mass revocation recorded", body = LogoutResponse),
        (status = 401, description = "Not authenticated", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_all_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .logout_all_sessions(user.user_id(), "user_requested")
        .await?;

    Ok(Json(LogoutResponse {
        message: "All sessions revoked".to_string(),
    }))
}

/// Claims of the presented token
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current identity", body = MeResponse),
        (status = 401, description = "Not authenticated", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn me_handler(Extension(user): Extension<AuthenticatedUser>) -> impl IntoResponse {
    let claims = user.claims;
    Json(MeResponse {
        user_id: claims.sub,
        login: claims.login,
        roles: claims.roles.into_iter().collect(),
        permissions: claims.permissions.into_iter().collect(),
        issued_at: claims.iat,
        expires_at: claims.exp,
    })
}
