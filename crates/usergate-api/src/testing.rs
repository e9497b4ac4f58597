//! Fixtures for integration tests
//!
//! Builds the full application over the in-memory store, a manual clock and
//! the in-memory account store, so tests can drive the router or the service
//! and move time forward.

use crate::audit::MemoryAuditSink;
use crate::auth::password::{hash_password_with_config, PasswordConfig};
use crate::auth::InMemoryAccountStore;
use crate::create_router;
use crate::state::{AppState, Backends};
use axum::Router;
use std::sync::Arc;
use usergate_core::{AppConfig, ManualClock, PasswordHashConfig, StoreBackend};
use usergate_store::MemoryStore;

/// Start time of every fixture clock, Unix epoch milliseconds
pub const TEST_START_MS: i64 = 1_700_000_000_000;

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-bytes";

/// Configuration used by [`TestApp::new`]
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.store.backend = StoreBackend::Memory;
    config.password = PasswordHashConfig {
        memory_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    };
    config
}

/// A wired application and handles to its test doubles
pub struct TestApp {
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub accounts: Arc<InMemoryAccountStore>,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestApp {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> anyhow::Result<Self> {
        let clock = Arc::new(ManualClock::new(TEST_START_MS));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let accounts = Arc::new(InMemoryAccountStore::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let state = Arc::new(AppState::new(
            config,
            Backends {
                kv_store: store.clone(),
                credentials: accounts.clone(),
                permissions: accounts.clone(),
                audit: audit.clone(),
                clock: clock.clone(),
            },
        )?);

        Ok(Self {
            state,
            clock,
            store,
            accounts,
            audit,
        })
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Add an account hashed with the configured cost and return its id
    pub async fn add_user(
        &self,
        login: &str,
        password: &str,
        roles: &[&str],
        permissions: &[&str],
    ) -> anyhow::Result<String> {
        let cost = PasswordConfig::from(&self.state.config.password);
        let hash = hash_password_with_config(password, &cost)?;
        let id = self
            .accounts
            .insert_account(login, &hash, roles, permissions)
            .await;
        Ok(id.to_string())
    }
}
