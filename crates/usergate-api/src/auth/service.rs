//! Authentication service layer
//!
//! Composes the credential store, token codec, revocation list and
//! brute-force guard into the login, validate, refresh and logout flows.
//!
//! Author: hephaex@gmail.com

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use usergate_core::{Clock, FailPolicy};

use super::brute_force::BruteForceGuard;
use super::credentials::{AccountRecord, CredentialStore, PermissionStore};
use super::password::{verify_password, PasswordError};
use super::revocation::RevocationStore;
use super::token::{IssuedToken, SessionClaims, TokenCodec, TokenError, TokenIdentity};
use crate::audit::{AuditSink, ClientInfo, SecurityEvent};
use crate::metrics::SecurityMetrics;

/// Logins slower than this are logged at WARN
const SLOW_AUTH_THRESHOLD: Duration = Duration::from_millis(500);

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown login or wrong password; the two are never distinguished
    #[error("Invalid login or password")]
    InvalidCredentials,

    #[error("Too many failed attempts")]
    AccountLocked,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Token does not belong to the user")]
    TokenMismatch,

    /// A collaborator could not answer and the policy is to refuse
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// Label used for the rejection metric and audit records
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked => "account_locked",
            Self::InvalidToken(TokenError::Expired) => "expired",
            Self::InvalidToken(_) => "invalid",
            Self::TokenRevoked => "revoked",
            Self::TokenMismatch => "mismatch",
            Self::ServiceUnavailable(_) => "unavailable",
        }
    }
}

/// Collaborators the service is built from
pub struct AuthComponents {
    pub credentials: Arc<dyn CredentialStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub codec: Arc<dyn TokenCodec>,
    pub revocations: Arc<dyn RevocationStore>,
    pub guard: Arc<BruteForceGuard>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Arc<SecurityMetrics>,
    pub clock: Arc<dyn Clock>,
    /// Checked instead of a stored hash when the login is unknown
    pub unknown_account_hash: String,
}

/// Authentication service
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    permissions: Arc<dyn PermissionStore>,
    codec: Arc<dyn TokenCodec>,
    revocations: Arc<dyn RevocationStore>,
    guard: Arc<BruteForceGuard>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<SecurityMetrics>,
    clock: Arc<dyn Clock>,
    unknown_account_hash: String,
    revocation_read_policy: FailPolicy,
}

impl AuthService {
    /// `revocation_read_policy` decides what a failed revocation lookup means
    pub fn new(components: AuthComponents, revocation_read_policy: FailPolicy) -> Self {
        Self {
            credentials: components.credentials,
            permissions: components.permissions,
            codec: components.codec,
            revocations: components.revocations,
            guard: components.guard,
            audit: components.audit,
            metrics: components.metrics,
            clock: components.clock,
            unknown_account_hash: components.unknown_account_hash,
            revocation_read_policy,
        }
    }

    pub fn revocations(&self) -> &Arc<dyn RevocationStore> {
        &self.revocations
    }

    /// Login with login name and password
    ///
    /// The block check runs before any credential lookup so a blocked caller
    /// learns nothing about the account. Unknown logins and wrong passwords
    /// both yield [`AuthError::InvalidCredentials`] and both count as a
    /// failed attempt.
    pub async fn authenticate(
        &self,
        login: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<IssuedToken, AuthError> {
        let started = Instant::now();
        let ip = client.ip_address.as_str();
        let session_id = client.session_id.as_deref();

        if self.guard.is_blocked(ip, login).await {
            self.metrics.record_login_failure();
            return Err(AuthError::AccountLocked);
        }

        let account = match self.verified_account(login, password).await {
            Ok(Some(account)) => account,
            Ok(None) => return Err(self.login_failed(login, client).await),
            Err(e) => return Err(self.login_error(login, client, e)),
        };

        self.guard.reset_attempts(ip, login, session_id).await;

        let user_id = account.id.to_string();
        let permissions = self
            .permissions
            .permissions_for_user(account.id)
            .await
            .map_err(|e| {
                error!(user_id = %user_id, "Failed to load permissions: {}", e);
                self.login_error(
                    login,
                    client,
                    AuthError::ServiceUnavailable("permission store".to_string()),
                )
            })?;

        let identity = TokenIdentity {
            subject: user_id.clone(),
            login: account.login.clone(),
            roles: account.roles.iter().cloned().collect(),
            permissions,
        };
        // A signing failure is a server fault, not a bad token
        let issued = self
            .codec
            .issue(&identity, self.login_claims(client))
            .map_err(|e| {
                error!(user_id = %user_id, "Failed to issue token: {}", e);
                self.login_error(
                    login,
                    client,
                    AuthError::ServiceUnavailable("token codec".to_string()),
                )
            })?;

        if let Err(e) = self
            .revocations
            .register_session(&user_id, &issued.token, client.device_info())
            .await
        {
            warn!(user_id = %user_id, "Failed to register session: {}", e);
        }

        self.metrics.record_login_success();
        self.audit.record_event(&SecurityEvent::LoginSuccess {
            user_id,
            login: account.login,
            client: client.clone(),
        });

        let elapsed = started.elapsed();
        if elapsed > SLOW_AUTH_THRESHOLD {
            warn!(login = %login, "Slow authentication: {:?}", elapsed);
        }

        Ok(issued)
    }

    /// Look the account up and check the password. `None` means the
    /// credentials do not match, whatever the cause.
    async fn verified_account(
        &self,
        login: &str,
        password: &str,
    ) -> Result<Option<AccountRecord>, AuthError> {
        let account = self
            .credentials
            .find_account_by_login(login)
            .await
            .map_err(|e| {
                error!("Credential lookup failed: {}", e);
                AuthError::ServiceUnavailable("credential store".to_string())
            })?;

        let Some(account) = account else {
            debug!("Login attempt for unknown account");
            // Same Argon2 work as a wrong password for a real account
            let _ = self
                .check_password(password, self.unknown_account_hash.clone())
                .await;
            return Ok(None);
        };

        match self
            .check_password(password, account.password_hash.clone())
            .await?
        {
            Ok(true) => Ok(Some(account)),
            Ok(false) => Ok(None),
            Err(e) => {
                error!(user_id = %account.id, "Stored password hash unusable: {}", e);
                Ok(None)
            }
        }
    }

    /// Argon2 is CPU-bound; keep it off the async workers
    async fn check_password(
        &self,
        password: &str,
        hash: String,
    ) -> Result<Result<bool, PasswordError>, AuthError> {
        let password = password.to_string();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::ServiceUnavailable(format!("password check: {e}")))
    }

    /// Record a login that failed for a reason other than the credentials
    fn login_error(&self, login: &str, client: &ClientInfo, err: AuthError) -> AuthError {
        self.metrics.record_login_failure();
        self.audit.record_event(&SecurityEvent::LoginFailure {
            login: login.to_string(),
            reason: err.reason().to_string(),
            client: client.clone(),
        });
        err
    }

    async fn login_failed(&self, login: &str, client: &ClientInfo) -> AuthError {
        let newly_blocked = self
            .guard
            .register_failed_attempt(&client.ip_address, login, client.session_id.as_deref())
            .await;

        self.metrics.record_login_failure();
        self.audit.record_event(&SecurityEvent::LoginFailure {
            login: login.to_string(),
            reason: "invalid_credentials".to_string(),
            client: client.clone(),
        });

        if newly_blocked {
            AuthError::AccountLocked
        } else {
            AuthError::InvalidCredentials
        }
    }

    fn login_claims(&self, client: &ClientInfo) -> Map<String, Value> {
        let mut custom = Map::new();
        custom.insert(
            "client_info".to_string(),
            json!({
                "ip_address": client.ip_address,
                "user_agent": client.user_agent,
            }),
        );
        custom.insert("auth_time".to_string(), json!(self.clock.now_ms()));
        custom
    }

    /// Validate a token presented on an authenticated request
    ///
    /// The revocation list is consulted before the signature.
    pub async fn validate_token(
        &self,
        token: &str,
        client: &ClientInfo,
    ) -> Result<SessionClaims, AuthError> {
        let result = match self.ensure_not_revoked(token).await {
            Ok(()) => self.codec.verify(token).map_err(AuthError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(claims) => {
                self.metrics.record_token_validation();
                Ok(claims)
            }
            Err(e) => Err(self.rejected(e, client)),
        }
    }

    /// Exchange a valid token for one with a fresh validity window
    ///
    /// The presented token is not revoked; it stays usable until it expires.
    pub async fn refresh_token(
        &self,
        token: &str,
        client: &ClientInfo,
    ) -> Result<IssuedToken, AuthError> {
        let result = match self.ensure_not_revoked(token).await {
            Ok(()) => self.codec.refresh(token).map_err(AuthError::from),
            Err(e) => Err(e),
        };
        let issued = result.map_err(|e| self.rejected(e, client))?;

        let user_id = issued.claims.sub.clone();
        if let Err(e) = self
            .revocations
            .register_session(&user_id, &issued.token, client.device_info())
            .await
        {
            warn!(user_id = %user_id, "Failed to register session: {}", e);
        }

        self.metrics.record_token_refresh();
        self.audit.record_event(&SecurityEvent::TokenRefresh {
            user_id,
            client: client.clone(),
        });

        Ok(issued)
    }

    async fn ensure_not_revoked(&self, token: &str) -> Result<(), AuthError> {
        match self.revocations.is_revoked(token).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(AuthError::TokenRevoked),
            Err(e) => match self.revocation_read_policy {
                FailPolicy::Open => {
                    warn!("Revocation lookup failed, accepting token: {}", e);
                    Ok(())
                }
                FailPolicy::Closed => {
                    error!("Revocation lookup failed, rejecting token: {}", e);
                    Err(AuthError::ServiceUnavailable("revocation store".to_string()))
                }
            },
        }
    }

    fn rejected(&self, err: AuthError, client: &ClientInfo) -> AuthError {
        debug!("Token rejected: {}", err);
        self.metrics.record_token_rejected(err.reason());
        self.audit.record_event(&SecurityEvent::TokenRejected {
            reason: err.reason().to_string(),
            client: client.clone(),
        });
        err
    }

    /// Revoke `token` for the rest of its natural lifetime
    ///
    /// The token must verify and belong to `user_id`. Revocation is a write
    /// path, so a store failure refuses the logout instead of pretending it
    /// succeeded.
    pub async fn logout(
        &self,
        token: &str,
        user_id: &str,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let outcome = self.try_logout(token, user_id).await;

        match &outcome {
            Ok(()) => {
                self.metrics.record_logout();
                self.metrics.record_token_blacklisted();
                info!(user_id = %user_id, "User logged out");
                self.audit.record_event(&SecurityEvent::Logout {
                    user_id: user_id.to_string(),
                    device_info: client.device_info().to_string(),
                    client: client.clone(),
                });
            }
            Err(e) => {
                self.audit.record_event(&SecurityEvent::LogoutFailed {
                    user_id: user_id.to_string(),
                    reason: e.reason().to_string(),
                    client: client.clone(),
                });
            }
        }

        outcome
    }

    async fn try_logout(&self, token: &str, user_id: &str) -> Result<(), AuthError> {
        let claims = self.codec.verify(token)?;
        if claims.sub != user_id {
            warn!(user_id = %user_id, "Logout token belongs to another user");
            return Err(AuthError::TokenMismatch);
        }

        self.revocations
            .revoke(token, claims.expires_at_ms())
            .await
            .map_err(|e| {
                error!(user_id = %user_id, "Failed to revoke token: {}", e);
                AuthError::ServiceUnavailable("revocation store".to_string())
            })
    }

    /// Record a "log out everywhere" marker for the user
    ///
    /// Tokens already issued to the user are not enumerated and stay valid
    /// until they expire.
    pub async fn logout_all_sessions(&self, user_id: &str, reason: &str) -> Result<(), AuthError> {
        self.revocations
            .revoke_all_for_user(user_id, reason)
            .await
            .map_err(|e| {
                error!(user_id = %user_id, "Failed to record mass revocation: {}", e);
                AuthError::ServiceUnavailable("revocation store".to_string())
            })?;

        self.metrics.record_user_blacklisted();
        self.audit.record_event(&SecurityEvent::LogoutAllSessions {
            user_id: user_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::auth::credentials::{CredentialError, InMemoryAccountStore};
    use crate::auth::password::{hash_password_with_config, PasswordConfig};
    use crate::auth::revocation::KvRevocationStore;
    use crate::auth::token::SignedTokenCodec;
    use usergate_core::{BruteForceConfig, ManualClock, RevocationConfig};
    use usergate_store::{KeyValueStore, MemoryStore};

    const SECRET: &[u8] = b"test-secret-key-at-least-32-bytes-long!!";

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        audit: Arc<MemoryAuditSink>,
        metrics: Arc<SecurityMetrics>,
        service: AuthService,
        alice_id: String,
    }

    /// Collaborators a test swaps for failing doubles
    #[derive(Default)]
    struct Overrides {
        credentials: Option<Arc<dyn CredentialStore>>,
        permissions: Option<Arc<dyn PermissionStore>>,
        codec: Option<Arc<dyn TokenCodec>>,
        guard_policy: Option<FailPolicy>,
    }

    async fn fixture(revocation_read_policy: FailPolicy) -> Fixture {
        fixture_with(revocation_read_policy, Overrides::default()).await
    }

    async fn fixture_with(revocation_read_policy: FailPolicy, overrides: Overrides) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let audit = Arc::new(MemoryAuditSink::new());
        let metrics = Arc::new(SecurityMetrics::new().unwrap());

        let accounts = Arc::new(InMemoryAccountStore::new());
        let hash = hash_password_with_config("correct horse", &PasswordConfig::insecure_fast())
            .unwrap();
        let alice_id = accounts
            .insert_account("alice", &hash, &["USER"], &["profile:read"])
            .await
            .to_string();

        let guard = Arc::new(BruteForceGuard::new(
            store.clone(),
            clock.clone(),
            BruteForceConfig::default(),
            overrides.guard_policy.unwrap_or(FailPolicy::Open),
            audit.clone(),
            metrics.clone(),
        ));
        let codec = overrides.codec.unwrap_or_else(|| {
            Arc::new(SignedTokenCodec::new(
                SECRET,
                "usergate",
                Duration::from_secs(3600),
                clock.clone(),
            )) as Arc<dyn TokenCodec>
        });
        let service = AuthService::new(
            AuthComponents {
                credentials: overrides
                    .credentials
                    .unwrap_or_else(|| accounts.clone() as Arc<dyn CredentialStore>),
                permissions: overrides.permissions.unwrap_or(accounts),
                codec,
                revocations: Arc::new(KvRevocationStore::new(
                    store.clone(),
                    clock.clone(),
                    RevocationConfig::default(),
                )),
                guard,
                audit: audit.clone(),
                metrics: metrics.clone(),
                clock: clock.clone(),
                unknown_account_hash: PasswordConfig::insecure_fast().placeholder_hash(),
            },
            revocation_read_policy,
        );

        Fixture {
            clock,
            store,
            audit,
            metrics,
            service,
            alice_id,
        }
    }

    fn client() -> ClientInfo {
        ClientInfo::new("10.0.0.1").with_user_agent("test-agent")
    }

    struct UnreachableDatabase;

    #[async_trait::async_trait]
    impl CredentialStore for UnreachableDatabase {
        async fn find_account_by_login(
            &self,
            _login: &str,
        ) -> Result<Option<AccountRecord>, CredentialError> {
            Err(CredentialError::Database("connection refused".to_string()))
        }
    }

    #[async_trait::async_trait]
    impl PermissionStore for UnreachableDatabase {
        async fn permissions_for_user(
            &self,
            _user_id: uuid::Uuid,
        ) -> Result<std::collections::BTreeSet<String>, CredentialError> {
            Err(CredentialError::Database("connection refused".to_string()))
        }
    }

    struct BrokenSigner;

    impl TokenCodec for BrokenSigner {
        fn issue(
            &self,
            _identity: &TokenIdentity,
            _custom: Map<String, Value>,
        ) -> Result<IssuedToken, TokenError> {
            Err(TokenError::Encoding("key rejected".to_string()))
        }

        fn verify(&self, _token: &str) -> Result<SessionClaims, TokenError> {
            Err(TokenError::Invalid("unsupported".to_string()))
        }
    }

    fn last_failure_reason(audit: &MemoryAuditSink) -> Option<String> {
        audit.events().into_iter().rev().find_map(|event| match event {
            SecurityEvent::LoginFailure { reason, .. } => Some(reason),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_credential_store_outage_is_audited() {
        let f = fixture_with(
            FailPolicy::Closed,
            Overrides {
                credentials: Some(Arc::new(UnreachableDatabase)),
                ..Overrides::default()
            },
        )
        .await;

        let err = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
        assert_eq!(f.audit.count("login_failure"), 1);
        assert_eq!(last_failure_reason(&f.audit).as_deref(), Some("unavailable"));
        assert_eq!(f.metrics.login_failure_count(), 1);
        // An outage is not a wrong password
        assert!(!f.store.exists("auth_attempt:username:alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_permission_store_outage_is_audited() {
        let f = fixture_with(
            FailPolicy::Closed,
            Overrides {
                permissions: Some(Arc::new(UnreachableDatabase)),
                ..Overrides::default()
            },
        )
        .await;

        let err = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
        assert_eq!(f.audit.count("login_failure"), 1);
        assert_eq!(f.audit.count("login_success"), 0);
    }

    #[tokio::test]
    async fn test_signing_failure_is_not_an_invalid_token() {
        let f = fixture_with(
            FailPolicy::Closed,
            Overrides {
                codec: Some(Arc::new(BrokenSigner)),
                ..Overrides::default()
            },
        )
        .await;

        let err = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
        assert_eq!(err.reason(), "unavailable");
        assert_eq!(last_failure_reason(&f.audit).as_deref(), Some("unavailable"));
    }

    #[tokio::test]
    async fn test_guard_fail_closed_refusal_is_audited() {
        let f = fixture_with(
            FailPolicy::Closed,
            Overrides {
                guard_policy: Some(FailPolicy::Closed),
                ..Overrides::default()
            },
        )
        .await;

        f.store.set_available(false);
        let err = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::AccountLocked));
        assert_eq!(f.audit.count("login_blocked"), 1);
    }

    #[tokio::test]
    async fn test_login_issues_token_with_roles_and_permissions() {
        let f = fixture(FailPolicy::Closed).await;
        let issued = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();

        assert_eq!(issued.claims.sub, f.alice_id);
        assert!(issued.claims.has_role("USER"));
        assert!(issued.claims.has_permission("profile:read"));
        assert_eq!(
            issued.claims.custom.get("auth_time"),
            Some(&json!(f.clock.now_ms()))
        );
        assert_eq!(issued.claims.custom["client_info"]["ip_address"], "10.0.0.1");
        assert_eq!(f.metrics.login_success_count(), 1);
        assert_eq!(f.audit.count("login_success"), 1);
    }

    #[tokio::test]
    async fn test_unknown_login_and_wrong_password_are_indistinguishable() {
        let f = fixture(FailPolicy::Closed).await;
        let unknown = f
            .service
            .authenticate("mallory", "whatever", &client())
            .await
            .unwrap_err();
        let wrong = f
            .service
            .authenticate("alice", "wrong", &client())
            .await
            .unwrap_err();

        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(f.metrics.login_failure_count(), 2);
    }

    #[tokio::test]
    async fn test_fifth_failure_locks_username() {
        let f = fixture(FailPolicy::Closed).await;
        for _ in 0..4 {
            let err = f
                .service
                .authenticate("alice", "wrong", &client())
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        let fifth = f
            .service
            .authenticate("alice", "wrong", &client())
            .await
            .unwrap_err();
        assert!(matches!(fifth, AuthError::AccountLocked));

        // Even the right password is refused while blocked
        let sixth = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap_err();
        assert!(matches!(sixth, AuthError::AccountLocked));
        assert_eq!(
            f.store
                .get("block:username:alice:history")
                .await
                .unwrap()
                .as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_revoked_token_reports_revoked() {
        let f = fixture(FailPolicy::Closed).await;
        let issued = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();

        f.service
            .logout(&issued.token, &f.alice_id, &client())
            .await
            .unwrap();

        let err = f
            .service
            .validate_token(&issued.token, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
        assert_eq!(f.metrics.token_rejected_count("revoked"), 1);
        assert_eq!(f.audit.count("logout"), 1);
    }

    #[tokio::test]
    async fn test_expired_token_wrapped_as_invalid() {
        let f = fixture(FailPolicy::Closed).await;
        let issued = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();

        f.clock.advance(Duration::from_secs(3600));
        let err = f
            .service
            .validate_token(&issued.token, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(TokenError::Expired)));
        assert_eq!(err.reason(), "expired");
    }

    #[tokio::test]
    async fn test_logout_rejects_foreign_token() {
        let f = fixture(FailPolicy::Closed).await;
        let issued = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();

        let err = f
            .service
            .logout(&issued.token, "someone-else", &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenMismatch));
        assert_eq!(f.audit.count("logout_failed"), 1);
        assert!(f.service.validate_token(&issued.token, &client()).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_fails_closed_when_store_down() {
        let f = fixture(FailPolicy::Open).await;
        let issued = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();

        f.store.set_available(false);
        let err = f
            .service
            .logout(&issued.token, &f.alice_id, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_revocation_read_policy() {
        let closed = fixture(FailPolicy::Closed).await;
        let issued = closed
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();
        closed.store.set_available(false);
        assert!(matches!(
            closed.service.validate_token(&issued.token, &client()).await,
            Err(AuthError::ServiceUnavailable(_))
        ));

        let open = fixture(FailPolicy::Open).await;
        let issued = open
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();
        open.store.set_available(false);
        assert!(open
            .service
            .validate_token(&issued.token, &client())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_refresh_keeps_identity_and_drops_custom_claims() {
        let f = fixture(FailPolicy::Closed).await;
        let issued = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();

        f.clock.advance(Duration::from_secs(600));
        let refreshed = f
            .service
            .refresh_token(&issued.token, &client())
            .await
            .unwrap();

        assert_eq!(refreshed.claims.identity(), issued.claims.identity());
        assert_eq!(refreshed.claims.exp, issued.claims.exp + 600);
        assert!(refreshed.claims.custom.is_empty());
        assert_eq!(f.audit.count("token_refresh"), 1);
    }

    #[tokio::test]
    async fn test_refresh_of_revoked_token_fails() {
        let f = fixture(FailPolicy::Closed).await;
        let issued = f
            .service
            .authenticate("alice", "correct horse", &client())
            .await
            .unwrap();
        f.service
            .logout(&issued.token, &f.alice_id, &client())
            .await
            .unwrap();

        assert!(matches!(
            f.service.refresh_token(&issued.token, &client()).await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_logout_all_sessions_records_marker() {
        let f = fixture(FailPolicy::Closed).await;
        f.service
            .logout_all_sessions(&f.alice_id, "password changed")
            .await
            .unwrap();

        let marker = f
            .service
            .revocations()
            .user_marker(&f.alice_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(marker.reason, "password changed");
        assert_eq!(f.audit.count("logout_all_sessions"), 1);
    }
}
