//! Token revocation
//!
//! Lets a token (or all of a user's tokens) be rejected before its natural
//! expiry. Entries are keyed by the SHA-256 of the token and carry a TTL equal
//! to the token's remaining lifetime, so the list never outgrows the set of
//! still-valid tokens.
//!
//! Mass revocation only records a per-user marker; tokens already issued to
//! that user are not enumerated and keep validating until they expire.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use usergate_core::{Clock, RevocationConfig};
use usergate_store::{KeyValueStore, StoreError};

use crate::metrics::SecurityMetrics;

pub const TOKEN_KEY_PREFIX: &str = "blacklisted_token:";
pub const USER_KEY_PREFIX: &str = "blacklisted_user:";
pub const SESSION_INDEX_PREFIX: &str = "user_tokens:";

/// Length of the token-hash prefix used as the session index field
const SESSION_FIELD_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("revocation store error: {0}")]
    Store(#[from] StoreError),

    #[error("corrupt revocation marker for user {0}")]
    CorruptMarker(String),
}

/// Durable "log out everywhere" record for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRevocationMarker {
    pub revoked_at_ms: i64,
    pub reason: String,
}

/// Revocation list
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Reject `token` until `expires_at_ms`. Already-expired tokens are ignored.
    async fn revoke(&self, token: &str, expires_at_ms: i64) -> Result<(), RevocationError>;

    async fn is_revoked(&self, token: &str) -> Result<bool, RevocationError>;

    /// Record a mass-revocation marker for the user
    async fn revoke_all_for_user(&self, user_id: &str, reason: &str)
        -> Result<(), RevocationError>;

    async fn user_marker(
        &self,
        user_id: &str,
    ) -> Result<Option<UserRevocationMarker>, RevocationError>;

    /// Approximate number of live revocation entries
    async fn size(&self) -> Result<u64, RevocationError>;

    /// Remember which device a token was issued to. Backends without session
    /// bookkeeping keep the no-op default.
    async fn register_session(
        &self,
        _user_id: &str,
        _token: &str,
        _device_info: &str,
    ) -> Result<(), RevocationError> {
        Ok(())
    }
}

/// SHA-256 of a token, hex encoded
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Revocation list kept in the shared key-value store
pub struct KvRevocationStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: RevocationConfig,
}

impl KvRevocationStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: RevocationConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn token_key(token: &str) -> String {
        format!("{}{}", TOKEN_KEY_PREFIX, hash_token(token))
    }

    fn user_key(user_id: &str) -> String {
        format!("{}{}", USER_KEY_PREFIX, user_id)
    }
}

#[async_trait]
impl RevocationStore for KvRevocationStore {
    async fn revoke(&self, token: &str, expires_at_ms: i64) -> Result<(), RevocationError> {
        let remaining_ms = expires_at_ms.saturating_sub(self.clock.now_ms());
        if remaining_ms <= 0 {
            debug!("Token already expired, not adding revocation entry");
            return Ok(());
        }

        let ttl = Duration::from_millis(remaining_ms as u64);
        self.store
            .set_with_ttl(&Self::token_key(token), "revoked", ttl)
            .await?;

        info!("Token revoked, entry expires in {:?}", ttl);
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, RevocationError> {
        Ok(self.store.exists(&Self::token_key(token)).await?)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: &str,
        reason: &str,
    ) -> Result<(), RevocationError> {
        let value = format!("{}:{}", self.clock.now_ms(), reason);
        self.store
            .set_with_ttl(
                &Self::user_key(user_id),
                &value,
                self.config.user_marker_retention(),
            )
            .await?;

        warn!(user_id = %user_id, reason = %reason, "All sessions revoked for user");
        Ok(())
    }

    async fn user_marker(
        &self,
        user_id: &str,
    ) -> Result<Option<UserRevocationMarker>, RevocationError> {
        let Some(value) = self.store.get(&Self::user_key(user_id)).await? else {
            return Ok(None);
        };

        let (revoked_at, reason) = value
            .split_once(':')
            .ok_or_else(|| RevocationError::CorruptMarker(user_id.to_string()))?;
        let revoked_at_ms = revoked_at
            .parse()
            .map_err(|_| RevocationError::CorruptMarker(user_id.to_string()))?;

        Ok(Some(UserRevocationMarker {
            revoked_at_ms,
            reason: reason.to_string(),
        }))
    }

    async fn size(&self) -> Result<u64, RevocationError> {
        Ok(self.store.count_prefix(TOKEN_KEY_PREFIX).await?)
    }

    async fn register_session(
        &self,
        user_id: &str,
        token: &str,
        device_info: &str,
    ) -> Result<(), RevocationError> {
        let hash = hash_token(token);
        let field = &hash[..SESSION_FIELD_LEN];
        self.store
            .hash_set(
                &format!("{}{}", SESSION_INDEX_PREFIX, user_id),
                field,
                device_info,
                self.config.session_index_retention(),
            )
            .await?;

        debug!(user_id = %user_id, "Session registered");
        Ok(())
    }
}

/// Periodically log the revocation list size and publish it as a gauge
pub fn spawn_size_reporter(
    revocations: Arc<dyn RevocationStore>,
    metrics: Arc<SecurityMetrics>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match revocations.size().await {
                Ok(size) => {
                    metrics.set_blacklist_size(size);
                    info!("Revocation list size: {}", size);
                }
                Err(e) => warn!("Failed to read revocation list size: {}", e),
            }
        }
    })
}
