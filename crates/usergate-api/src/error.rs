//! API error handling
//!
//! Every error body is `{code, message}` with a stable code and a generic
//! message. Internal error text is logged, never serialized.
//!
//! Author: hephaex@gmail.com

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input() -> Self {
        Self::new("INVALID_INPUT", "Request contains disallowed content")
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::InvalidToken(_) | AuthError::TokenRevoked => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::AccountLocked => StatusCode::TOO_MANY_REQUESTS,
            AuthError::TokenMismatch => StatusCode::BAD_REQUEST,
            AuthError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        // Expired and invalid tokens look the same to clients
        match self {
            AuthError::InvalidCredentials => {
                ApiError::new("INVALID_CREDENTIALS", "Invalid login or password")
            }
            AuthError::AccountLocked => ApiError::new(
                "ACCOUNT_LOCKED",
                "Too many failed attempts, try again later",
            ),
            AuthError::InvalidToken(_) => ApiError::new("INVALID_TOKEN", "Invalid or expired token"),
            AuthError::TokenRevoked => ApiError::new("TOKEN_REVOKED", "Token has been revoked"),
            AuthError::TokenMismatch => {
                ApiError::new("TOKEN_MISMATCH", "Token does not belong to the user")
            }
            AuthError::ServiceUnavailable(_) => ApiError::new(
                "SERVICE_UNAVAILABLE",
                "Service temporarily unavailable",
            ),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::ServiceUnavailable(what) = &self {
            error!("Request refused, dependency unavailable: {}", what);
        }
        (self.status_code(), Json(self.to_api_error())).into_response()
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    BadRequest(String),
    Internal(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Auth(err) => err.into_response(),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new("BAD_REQUEST", msg)),
            )
                .into_response(),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiError::internal_error()),
                )
                    .into_response()
            }
        }
    }
}
