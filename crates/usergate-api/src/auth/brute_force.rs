//! Brute-force protection
//!
//! Failed authentication attempts are counted per IP, per username and per
//! client session in the shared store. Crossing the IP or username threshold
//! creates a block whose duration doubles with every previous block of the same
//! scope (tracked in a long-lived history counter), capped at a maximum. The
//! session counter is advisory and only raises an audit event.
//!
//! Store failures never propagate out of the guard; the configured
//! [`FailPolicy`] decides whether an unanswerable block check counts as blocked.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use usergate_core::{BruteForceConfig, Clock, FailPolicy};
use usergate_store::{KeyValueStore, StoreError};

use crate::audit::{AuditSink, ClientInfo, SecurityEvent};
use crate::metrics::SecurityMetrics;

pub const IP_ATTEMPT_PREFIX: &str = "auth_attempt:ip:";
pub const USERNAME_ATTEMPT_PREFIX: &str = "auth_attempt:username:";
pub const SESSION_ATTEMPT_PREFIX: &str = "auth_attempt:session:";
pub const IP_BLOCK_PREFIX: &str = "block:ip:";
pub const USERNAME_BLOCK_PREFIX: &str = "block:username:";
const HISTORY_SUFFIX: &str = ":history";

/// What a block applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockScope {
    Ip,
    Username,
}

impl BlockScope {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Username => "username",
        }
    }

    pub fn block_key(self, value: &str) -> String {
        let prefix = match self {
            Self::Ip => IP_BLOCK_PREFIX,
            Self::Username => USERNAME_BLOCK_PREFIX,
        };
        format!("{prefix}{value}")
    }

    pub fn history_key(self, value: &str) -> String {
        format!("{}{HISTORY_SUFFIX}", self.block_key(value))
    }
}

/// Duration of the `block_count`-th block of a scope
///
/// `initial × multiplier^(block_count − 1)`, capped at the configured maximum.
pub fn escalated_block_duration(config: &BruteForceConfig, block_count: u64) -> Duration {
    let exponent = u32::try_from(block_count.saturating_sub(1)).unwrap_or(u32::MAX);
    let factor = u64::from(config.block_multiplier)
        .checked_pow(exponent)
        .unwrap_or(u64::MAX);
    let secs = config
        .initial_block_secs
        .saturating_mul(factor)
        .min(config.max_block_secs);
    Duration::from_secs(secs)
}

/// Throttles repeated failed authentication attempts
pub struct BruteForceGuard {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: BruteForceConfig,
    fail_policy: FailPolicy,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<SecurityMetrics>,
}

impl BruteForceGuard {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: BruteForceConfig,
        fail_policy: FailPolicy,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<SecurityMetrics>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            fail_policy,
            audit,
            metrics,
        }
    }

    pub fn config(&self) -> &BruteForceConfig {
        &self.config
    }

    /// True if the IP or the username has an active block
    pub async fn is_blocked(&self, ip: &str, username: &str) -> bool {
        let blocked = match self.active_block(ip, username).await {
            Ok(scope) => scope.map(BlockScope::label),
            Err(e) => match self.fail_policy {
                FailPolicy::Open => {
                    warn!(ip = %ip, "Block check failed, allowing attempt: {}", e);
                    None
                }
                FailPolicy::Closed => {
                    error!(ip = %ip, "Block check failed, refusing attempt: {}", e);
                    Some("store_unavailable")
                }
            },
        };

        let Some(scope) = blocked else {
            return false;
        };

        debug!(scope, "Authentication attempt while blocked");
        self.audit.record_event(&SecurityEvent::LoginBlocked {
            login: username.to_string(),
            client: ClientInfo::new(ip),
        });
        true
    }

    async fn active_block(
        &self,
        ip: &str,
        username: &str,
    ) -> Result<Option<BlockScope>, StoreError> {
        if self.store.exists(&BlockScope::Ip.block_key(ip)).await? {
            return Ok(Some(BlockScope::Ip));
        }
        if self
            .store
            .exists(&BlockScope::Username.block_key(username))
            .await?
        {
            return Ok(Some(BlockScope::Username));
        }
        Ok(None)
    }

    /// Count a failed attempt in all three scopes
    ///
    /// Returns true only when this call created a new block. A scope that is
    /// already blocked is neither re-blocked nor re-signalled.
    pub async fn register_failed_attempt(
        &self,
        ip: &str,
        username: &str,
        session_id: Option<&str>,
    ) -> bool {
        let ip_count = self
            .bump(&format!("{IP_ATTEMPT_PREFIX}{ip}"), self.config.ip_window())
            .await;
        let username_count = self
            .bump(
                &format!("{USERNAME_ATTEMPT_PREFIX}{username}"),
                self.config.username_window(),
            )
            .await;

        if let Some(session_id) = session_id {
            let session_count = self
                .bump(
                    &format!("{SESSION_ATTEMPT_PREFIX}{session_id}"),
                    self.config.session_window(),
                )
                .await;
            if let Some(attempts) = session_count.filter(|c| *c >= self.config.session_max_attempts)
            {
                warn!(attempts, "Repeated failed attempts from one session");
                self.audit
                    .record_event(&SecurityEvent::SuspiciousSessionActivity {
                        session_id: session_id.to_string(),
                        attempts,
                        ip_address: ip.to_string(),
                    });
            }
        }

        let mut blocked_now = false;
        if ip_count.is_some_and(|c| c >= self.config.ip_max_attempts) {
            blocked_now |= self.block(BlockScope::Ip, ip).await;
        }
        if username_count.is_some_and(|c| c >= self.config.username_max_attempts) {
            blocked_now |= self.block(BlockScope::Username, username).await;
        }
        blocked_now
    }

    /// Relax counters after a successful authentication
    ///
    /// The session counter is dropped; IP and username counters are reduced
    /// rather than cleared, and deleted once they reach zero.
    pub async fn reset_attempts(&self, ip: &str, username: &str, session_id: Option<&str>) {
        if let Some(session_id) = session_id {
            let key = format!("{SESSION_ATTEMPT_PREFIX}{session_id}");
            if let Err(e) = self.store.delete(&key).await {
                warn!("Failed to clear session attempt counter: {}", e);
            }
        }

        for key in [
            format!("{IP_ATTEMPT_PREFIX}{ip}"),
            format!("{USERNAME_ATTEMPT_PREFIX}{username}"),
        ] {
            if let Err(e) = self.relax(&key).await {
                warn!("Failed to reduce attempt counter: {}", e);
            }
        }
    }

    async fn relax(&self, key: &str) -> Result<(), StoreError> {
        if !self.store.exists(key).await? {
            return Ok(());
        }
        let remaining = self
            .store
            .increment(key, -self.config.success_decrement, None)
            .await?;
        if remaining <= 0 {
            self.store.delete(key).await?;
        }
        Ok(())
    }

    async fn bump(&self, key: &str, window: Duration) -> Option<i64> {
        match self.store.increment(key, 1, Some(window)).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Failed to record failed attempt: {}", e);
                None
            }
        }
    }

    async fn block(&self, scope: BlockScope, value: &str) -> bool {
        match self.try_block(scope, value).await {
            Ok(created) => created,
            Err(e) => {
                error!(scope = scope.label(), "Failed to create block: {}", e);
                false
            }
        }
    }

    async fn try_block(&self, scope: BlockScope, value: &str) -> Result<bool, StoreError> {
        let block_key = scope.block_key(value);
        if self.store.exists(&block_key).await? {
            return Ok(false);
        }

        let history_key = scope.history_key(value);
        let previous_blocks = self
            .store
            .get(&history_key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let block_count = previous_blocks.saturating_add(1);
        let duration = escalated_block_duration(&self.config, block_count as u64);

        // Only the caller that wins the insert records history
        let blocked_at = self.clock.now_ms().to_string();
        if !self
            .store
            .set_if_absent(&block_key, &blocked_at, duration)
            .await?
        {
            return Ok(false);
        }
        self.store.increment(&history_key, 1, None).await?;
        self.store
            .expire(&history_key, self.config.history_retention())
            .await?;

        self.metrics.record_block_created(scope.label());
        let event = match scope {
            BlockScope::Ip => SecurityEvent::IpBlocked {
                ip_address: value.to_string(),
                block_secs: duration.as_secs(),
                block_count,
            },
            BlockScope::Username => SecurityEvent::UsernameBlocked {
                username: value.to_string(),
                block_secs: duration.as_secs(),
                block_count,
            },
        };
        self.audit.record_event(&event);

        Ok(true)
    }
}
