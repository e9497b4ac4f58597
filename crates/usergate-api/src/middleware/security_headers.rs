//! Security headers and input filtering middleware
//!
//! [`security_headers_middleware`] adds the browser hardening headers to every
//! response. [`xss_filter_middleware`] rejects state-changing requests whose
//! query string, `User-Agent` or `Referer` carry script-injection patterns.
//!
//! Author: hephaex@gmail.com

use crate::audit::{ClientInfo, SecurityEvent};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

/// Paths never scanned by the input filter
pub const XSS_EXCLUDED_PREFIXES: &[&str] = &[
    "/api/v1/auth/login",
    "/api/v1/auth/refresh",
    "/swagger-ui",
    "/api-docs",
    "/health",
    "/metrics",
];

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
    script-src 'self' 'unsafe-inline' https://cdnjs.cloudflare.com; \
    style-src 'self' 'unsafe-inline' https://cdnjs.cloudflare.com; \
    img-src 'self' data:; \
    font-src 'self' https://cdnjs.cloudflare.com; \
    connect-src 'self'";

lazy_static! {
    static ref XSS_PATTERNS: Vec<Regex> = [
        r"(?is)<script(.*?)>",
        r"(?i)</script>",
        r#"(?is)src[\r\n]*=[\r\n]*'(.*?)'"#,
        r#"(?is)src[\r\n]*=[\r\n]*"(.*?)""#,
        r"(?is)eval\((.*?)\)",
        r"(?is)expression\((.*?)\)",
        r"(?i)javascript:",
        r"(?i)vbscript:",
        r"(?is)alert\((.*?)\)",
        r"(?is)onload(.*?)=",
        r"(?is)onclick(.*?)=",
        r"(?is)onerror(.*?)=",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect();
}

/// True if `value` matches any script-injection pattern
pub fn is_xss_attack(value: &str) -> bool {
    XSS_PATTERNS.iter().any(|re| re.is_match(value))
}

pub fn is_excluded_path(path: &str) -> bool {
    XSS_EXCLUDED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

/// Name of the first request input carrying an injection pattern
fn find_violation(request: &Request<Body>) -> Option<String> {
    if let Ok(Query(params)) = Query::<Vec<(String, String)>>::try_from_uri(request.uri()) {
        if let Some((name, _)) = params.iter().find(|(_, value)| is_xss_attack(value)) {
            return Some(format!("parameter:{name}"));
        }
    }

    let headers: &HeaderMap = request.headers();
    [header::USER_AGENT, header::REFERER]
        .into_iter()
        .find(|name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .is_some_and(is_xss_attack)
        })
        .map(|name| format!("header:{name}"))
}

/// Reject POST/PUT/PATCH requests carrying script-injection patterns
pub async fn xss_filter_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let scanned = [Method::POST, Method::PUT, Method::PATCH].contains(request.method())
        && !is_excluded_path(request.uri().path());

    if scanned {
        if let Some(source) = find_violation(&request) {
            let path = request.uri().path().to_string();
            warn!(path = %path, source = %source, "Potential XSS attack detected");
            state.audit.record_event(&SecurityEvent::XssViolation {
                path,
                source,
                client: ClientInfo::from_request(request.headers(), request.extensions()),
            });
            return (StatusCode::BAD_REQUEST, Json(ApiError::invalid_input())).into_response();
        }
    }

    next.run(request).await
}

/// Security headers middleware
///
/// Applied to every response, including errors.
pub async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=(), payment=()"),
    );

    response
}
