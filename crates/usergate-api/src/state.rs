//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::audit::AuditSink;
use crate::auth::password::PasswordConfig;
use crate::auth::{
    build_codec, AuthComponents, AuthService, BruteForceGuard, CredentialStore,
    KvRevocationStore, PermissionStore, RevocationStore,
};
use crate::metrics::SecurityMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use usergate_core::{AppConfig, Clock};
use usergate_store::KeyValueStore;

/// External collaborators the application is wired to
pub struct Backends {
    pub kv_store: Arc<dyn KeyValueStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    pub auth: Arc<AuthService>,
    pub revocations: Arc<dyn RevocationStore>,
    pub metrics: Arc<SecurityMetrics>,
    pub audit: Arc<dyn AuditSink>,
    pub kv_store: Arc<dyn KeyValueStore>,
    /// Server start time
    pub start_time: Instant,
    /// Ready status
    pub is_ready: AtomicBool,
}

impl AppState {
    /// Wire the authentication core from configuration and backends
    pub fn new(config: AppConfig, backends: Backends) -> anyhow::Result<Self> {
        let metrics = Arc::new(SecurityMetrics::new()?);
        let codec = build_codec(&config.auth, backends.clock.clone())?;

        let revocations: Arc<dyn RevocationStore> = Arc::new(KvRevocationStore::new(
            backends.kv_store.clone(),
            backends.clock.clone(),
            config.revocation.clone(),
        ));
        let guard = Arc::new(BruteForceGuard::new(
            backends.kv_store.clone(),
            backends.clock.clone(),
            config.brute_force.clone(),
            config.store.guard_fail_policy,
            backends.audit.clone(),
            metrics.clone(),
        ));

        let auth = Arc::new(AuthService::new(
            AuthComponents {
                credentials: backends.credentials,
                permissions: backends.permissions,
                codec,
                revocations: revocations.clone(),
                guard,
                audit: backends.audit.clone(),
                metrics: metrics.clone(),
                clock: backends.clock,
                unknown_account_hash: PasswordConfig::from(&config.password).placeholder_hash(),
            },
            config.store.revocation_read_policy,
        ));

        Ok(Self {
            config,
            auth,
            revocations,
            metrics,
            audit: backends.audit,
            kv_store: backends.kv_store,
            start_time: Instant::now(),
            is_ready: AtomicBool::new(true),
        })
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }
}
