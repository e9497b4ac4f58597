//! Security metrics
//!
//! Counters are incremented on the authentication hot path; prometheus
//! counters are atomics, so recording never blocks.
//!
//! Author: hephaex@gmail.com

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus metrics for authentication events
pub struct SecurityMetrics {
    registry: Registry,
    login_success: IntCounter,
    login_failure: IntCounter,
    token_validation: IntCounter,
    token_refresh: IntCounter,
    logout: IntCounter,
    token_blacklisted: IntCounter,
    token_rejected: IntCounterVec,
    user_blacklisted: IntCounter,
    block_created: IntCounterVec,
    blacklist_size: IntGauge,
}

impl SecurityMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let login_success =
            IntCounter::new("auth_login_success_total", "Successful authentications")?;
        let login_failure = IntCounter::new(
            "auth_login_failure_total",
            "Failed authentications, including blocked attempts",
        )?;
        let token_validation =
            IntCounter::new("auth_token_validation_total", "Successful token validations")?;
        let token_refresh = IntCounter::new("auth_token_refresh_total", "Tokens refreshed")?;
        let logout = IntCounter::new("auth_logout_total", "Single-session logouts")?;
        let token_blacklisted =
            IntCounter::new("auth_token_blacklisted_total", "Tokens added to the revocation list")?;
        let token_rejected = IntCounterVec::new(
            Opts::new("auth_token_rejected_total", "Tokens rejected during validation"),
            &["reason"],
        )?;
        let user_blacklisted = IntCounter::new(
            "auth_user_blacklisted_total",
            "Mass revocations (log out everywhere)",
        )?;
        let block_created = IntCounterVec::new(
            Opts::new("auth_block_created_total", "Brute-force blocks created"),
            &["scope"],
        )?;
        let blacklist_size =
            IntGauge::new("auth_blacklist_size", "Live entries in the revocation list")?;

        registry.register(Box::new(login_success.clone()))?;
        registry.register(Box::new(login_failure.clone()))?;
        registry.register(Box::new(token_validation.clone()))?;
        registry.register(Box::new(token_refresh.clone()))?;
        registry.register(Box::new(logout.clone()))?;
        registry.register(Box::new(token_blacklisted.clone()))?;
        registry.register(Box::new(token_rejected.clone()))?;
        registry.register(Box::new(user_blacklisted.clone()))?;
        registry.register(Box::new(block_created.clone()))?;
        registry.register(Box::new(blacklist_size.clone()))?;

        Ok(Self {
            registry,
            login_success,
            login_failure,
            token_validation,
            token_refresh,
            logout,
            token_blacklisted,
            token_rejected,
            user_blacklisted,
            block_created,
            blacklist_size,
        })
    }

    pub fn record_login_success(&self) {
        self.login_success.inc();
    }

    pub fn record_login_failure(&self) {
        self.login_failure.inc();
    }

    pub fn record_token_validation(&self) {
        self.token_validation.inc();
    }

    pub fn record_token_refresh(&self) {
        self.token_refresh.inc();
    }

    pub fn record_logout(&self) {
        self.logout.inc();
    }

    pub fn record_token_blacklisted(&self) {
        self.token_blacklisted.inc();
    }

    /// `reason` is one of `revoked`, `expired`, `invalid`
    pub fn record_token_rejected(&self, reason: &str) {
        self.token_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_user_blacklisted(&self) {
        self.user_blacklisted.inc();
    }

    pub fn record_block_created(&self, scope: &str) {
        self.block_created.with_label_values(&[scope]).inc();
    }

    pub fn set_blacklist_size(&self, size: u64) {
        self.blacklist_size.set(i64::try_from(size).unwrap_or(i64::MAX));
    }

    /// Prometheus text exposition of every metric in the registry
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn login_success_count(&self) -> u64 {
        self.login_success.get()
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn login_failure_count(&self) -> u64 {
        self.login_failure.get()
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn token_rejected_count(&self, reason: &str) -> u64 {
        self.token_rejected.with_label_values(&[reason]).get()
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn block_created_count(&self, scope: &str) -> u64 {
        self.block_created.with_label_values(&[scope]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_all_metrics() {
        let metrics = SecurityMetrics::new().unwrap();
        metrics.record_login_success();
        metrics.record_token_rejected("revoked");
        metrics.record_block_created("ip");
        metrics.set_blacklist_size(42);

        let output = metrics.render().unwrap();
        for name in [
            "auth_login_success_total 1",
            "auth_login_failure_total 0",
            "auth_token_validation_total",
            "auth_token_refresh_total",
            "auth_logout_total",
            "auth_token_blacklisted_total",
            "auth_token_rejected_total{reason=\"revoked\"} 1",
            "auth_user_blacklisted_total",
            "auth_block_created_total{scope=\"ip\"} 1",
            "auth_blacklist_size 42",
        ] {
            assert!(output.contains(name), "missing {name} in:\n{output}");
        }
    }

    #[test]
    fn test_registries_are_independent() {
        let a = SecurityMetrics::new().unwrap();
        let b = SecurityMetrics::new().unwrap();
        a.record_login_failure();
        assert_eq!(a.login_failure_count(), 1);
        assert_eq!(b.login_failure_count(), 0);
    }
}
