//! Security audit logging for authentication events
//!
//! Audit events are emitted on the "audit" tracing target so they can be
//! filtered and routed separately from application logs. Levels follow event
//! severity:
//!
//! - successful events at INFO
//! - ordinary failures at WARN
//! - critical events (blocks, suspicious activity, policy violations) at ERROR
//!
//! Recording is fire-and-forget: an [`AuditSink`] never returns an error into
//! the authentication flow.
//!
//! Author: hephaex@gmail.com

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, Extensions, HeaderMap},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{error, info, warn};

/// Header carrying the client's session identifier
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Request metadata attached to audit events and brute-force counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client IP from proxy headers or the peer address, "unknown" when
    /// neither is available
    pub ip_address: String,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            session_id: None,
            user_agent: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Client context from proxy headers, falling back to the peer address
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        Self {
            ip_address: extract_ip_address(headers)
                .or_else(|| peer.map(|addr| addr.ip().to_string()))
                .unwrap_or_else(|| "unknown".to_string()),
            session_id: headers
                .get(SESSION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            user_agent: extract_user_agent(headers),
        }
    }

    /// Client context of a request served with `ConnectInfo<SocketAddr>`
    pub fn from_request(headers: &HeaderMap, extensions: &Extensions) -> Self {
        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::from_headers(headers, peer)
    }

    /// Device description stored with a registered session
    pub fn device_info(&self) -> &str {
        self.user_agent.as_deref().unwrap_or("unknown")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_request(&parts.headers, &parts.extensions))
    }
}

/// Security events recorded by the authentication core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SecurityEvent {
    LoginSuccess {
        user_id: String,
        login: String,
        client: ClientInfo,
    },

    /// Credentials missing or wrong (the two are not distinguished)
    LoginFailure {
        login: String,
        reason: String,
        client: ClientInfo,
    },

    /// Attempt refused because the IP or username is blocked
    LoginBlocked { login: String, client: ClientInfo },

    IpBlocked {
        ip_address: String,
        block_secs: u64,
        block_count: i64,
    },

    UsernameBlocked {
        username: String,
        block_secs: u64,
        block_count: i64,
    },

    /// Session counter crossed its advisory threshold
    SuspiciousSessionActivity {
        session_id: String,
        attempts: i64,
        ip_address: String,
    },

    TokenRefresh { user_id: String, client: ClientInfo },

    TokenRejected { reason: String, client: ClientInfo },

    Logout {
        user_id: String,
        device_info: String,
        client: ClientInfo,
    },

    LogoutFailed {
        user_id: String,
        reason: String,
        client: ClientInfo,
    },

    LogoutAllSessions { user_id: String, reason: String },

    /// Request rejected by the input filter
    XssViolation {
        path: String,
        source: String,
        client: ClientInfo,
    },
}

impl SecurityEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LoginSuccess { .. } => "login_success",
            Self::LoginFailure { .. } => "login_failure",
            Self::LoginBlocked { .. } => "login_blocked",
            Self::IpBlocked { .. } => "ip_blocked",
            Self::UsernameBlocked { .. } => "username_blocked",
            Self::SuspiciousSessionActivity { .. } => "suspicious_session_activity",
            Self::TokenRefresh { .. } => "token_refresh",
            Self::TokenRejected { .. } => "token_rejected",
            Self::Logout { .. } => "logout",
            Self::LogoutFailed { .. } => "logout_failed",
            Self::LogoutAllSessions { .. } => "logout_all_sessions",
            Self::XssViolation { .. } => "xss_violation",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::LoginSuccess { .. }
                | Self::TokenRefresh { .. }
                | Self::Logout { .. }
                | Self::LogoutAllSessions { .. }
        )
    }

    pub fn is_critical(&self) -> bool {
        let event_type = self.event_type();
        ["_blocked", "brute_force", "suspicious", "violation"]
            .iter()
            .any(|marker| event_type.contains(marker))
    }

    /// User the event is about, when known
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::LoginSuccess { user_id, .. }
            | Self::TokenRefresh { user_id, .. }
            | Self::Logout { user_id, .. }
            | Self::LogoutFailed { user_id, .. }
            | Self::LogoutAllSessions { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    pub fn client(&self) -> Option<&ClientInfo> {
        match self {
            Self::LoginSuccess { client, .. }
            | Self::LoginFailure { client, .. }
            | Self::LoginBlocked { client, .. }
            | Self::TokenRefresh { client, .. }
            | Self::TokenRejected { client, .. }
            | Self::Logout { client, .. }
            | Self::LogoutFailed { client, .. }
            | Self::XssViolation { client, .. } => Some(client),
            _ => None,
        }
    }
}

/// Destination for security events
pub trait AuditSink: Send + Sync {
    /// Must not panic or block; failures are swallowed
    fn record_event(&self, event: &SecurityEvent);
}

/// Writes events to the "audit" tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_event(&self, event: &SecurityEvent) {
        audit_log(event);
    }
}

/// Log a security event with structured fields
pub fn audit_log(event: &SecurityEvent) {
    let timestamp = Utc::now();
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));
    let event_type = event.event_type();
    let user_id = event.user_id().unwrap_or("-");
    let ip_address = event.client().map(|c| c.ip_address.as_str()).unwrap_or("-");

    if event.is_critical() {
        error!(
            target: "audit",
            timestamp = %timestamp,
            event_type = event_type,
            user_id = user_id,
            ip_address = ip_address,
            event = %event_json,
            "Security event"
        );
    } else if event.is_success() {
        info!(
            target: "audit",
            timestamp = %timestamp,
            event_type = event_type,
            user_id = user_id,
            ip_address = ip_address,
            event = %event_json,
            "Security event"
        );
    } else {
        warn!(
            target: "audit",
            timestamp = %timestamp,
            event_type = event_type,
            user_id = user_id,
            ip_address = ip_address,
            event = %event_json,
            "Security event"
        );
    }
}

/// Extract the client IP from proxy headers
///
/// X-Forwarded-For (first hop) wins over X-Real-IP.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(first_ip.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory_sink::MemoryAuditSink;

#[cfg(any(test, feature = "test-utils"))]
mod memory_sink {
    use super::{AuditSink, SecurityEvent};
    use std::sync::Mutex;

    /// Collects events in memory for assertions
    #[derive(Debug, Default)]
    pub struct MemoryAuditSink {
        events: Mutex<Vec<SecurityEvent>>,
    }

    impl MemoryAuditSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<SecurityEvent> {
            self.events
                .lock()
                .map(|events| events.clone())
                .unwrap_or_default()
        }

        pub fn event_types(&self) -> Vec<&'static str> {
            self.events().iter().map(SecurityEvent::event_type).collect()
        }

        pub fn count(&self, event_type: &str) -> usize {
            self.event_types()
                .into_iter()
                .filter(|t| *t == event_type)
                .count()
        }
    }

    impl AuditSink for MemoryAuditSink {
        fn record_event(&self, event: &SecurityEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
        }
    }
}
