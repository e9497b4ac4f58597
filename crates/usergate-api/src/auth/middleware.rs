//! Authentication middleware for protecting routes
//!
//! Extracts the bearer token, runs it through `AuthService::validate_token`
//! (revocation list first, then the codec) and adds the authenticated user to
//! the request extensions.

use super::service::AuthError;
use super::token::{SessionClaims, TokenError};
use crate::audit::{ClientInfo, SecurityEvent};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Authenticated caller, available to handlers as `Extension<AuthenticatedUser>`
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// The bearer token exactly as presented
    pub token: String,
    pub claims: SessionClaims,
    pub client: ClientInfo,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Require a valid, unrevoked session token
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let client = ClientInfo::from_request(request.headers(), request.extensions());

    let Some(token) = bearer_token(request.headers()).map(str::to_string) else {
        debug!("Request without bearer token");
        state.metrics.record_token_rejected("missing");
        state.audit.record_event(&SecurityEvent::TokenRejected {
            reason: "missing".to_string(),
            client,
        });
        return Err(AuthError::InvalidToken(TokenError::Invalid(
            "missing bearer token".to_string(),
        )));
    };

    let claims = state.auth.validate_token(&token, &client).await?;

    request.extensions_mut().insert(AuthenticatedUser {
        token,
        claims,
        client,
    });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer a.b.c"),
        );
        assert_eq!(bearer_token(&headers), Some("a.b.c"));
    }
}
