//! Authentication flow tests
//!
//! Multi-step scenarios driven through the service with a manual clock.

use std::sync::Arc;
use std::time::Duration;
use usergate_api::audit::ClientInfo;
use usergate_api::auth::{AuthError, RevocationStore, TokenError};
use usergate_api::testing::{test_config, TestApp};
use usergate_core::TokenMode;
use usergate_store::KeyValueStore;

fn client() -> ClientInfo {
    ClientInfo::new("192.0.2.10").with_user_agent("flow-tests")
}

async fn app_with_alice() -> TestApp {
    let app = TestApp::new().await.unwrap();
    app.add_user("alice", "s3cret-pass", &["USER"], &["profile:read"])
        .await
        .unwrap();
    app
}

#[tokio::test]
async fn test_success_relaxes_username_counter() {
    let app = app_with_alice().await;
    let auth = &app.state.auth;

    for _ in 0..3 {
        let result = auth.authenticate("alice", "wrong", &client()).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }
    auth.authenticate("alice", "s3cret-pass", &client())
        .await
        .unwrap();

    let result = auth.authenticate("alice", "wrong", &client()).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert_eq!(
        app.store
            .get("auth_attempt:username:alice")
            .await
            .unwrap()
            .as_deref(),
        Some("2")
    );
    assert!(!app.store.exists("block:username:alice").await.unwrap());
}

#[tokio::test]
async fn test_revocation_lasts_until_token_expiry() {
    let app = app_with_alice().await;
    let auth = &app.state.auth;

    let issued = auth
        .authenticate("alice", "s3cret-pass", &client())
        .await
        .unwrap();
    auth.logout(&issued.token, &issued.claims.sub, &client())
        .await
        .unwrap();

    app.clock.advance(Duration::from_secs(1800));
    assert!(matches!(
        auth.validate_token(&issued.token, &client()).await,
        Err(AuthError::TokenRevoked)
    ));
    assert_eq!(app.state.revocations.size().await.unwrap(), 1);

    app.clock.advance(Duration::from_secs(1800));
    assert_eq!(app.state.revocations.size().await.unwrap(), 0);
    assert!(matches!(
        auth.validate_token(&issued.token, &client()).await,
        Err(AuthError::InvalidToken(TokenError::Expired))
    ));
}

#[tokio::test]
async fn test_block_expires_and_repeat_block_escalates() {
    let app = app_with_alice().await;
    let auth = &app.state.auth;

    for _ in 0..5 {
        let _ = auth.authenticate("alice", "wrong", &client()).await;
    }
    assert_eq!(
        app.store.ttl("block:username:alice").await,
        Some(Duration::from_secs(300))
    );

    app.clock.advance(Duration::from_secs(300));
    assert!(!app.store.exists("block:username:alice").await.unwrap());

    // The attempt counter window is still open, so one more failure re-blocks
    let result = auth.authenticate("alice", "wrong", &client()).await;
    assert!(matches!(result, Err(AuthError::AccountLocked)));
    assert_eq!(
        app.store.ttl("block:username:alice").await,
        Some(Duration::from_secs(600))
    );
    assert_eq!(app.audit.count("username_blocked"), 2);
}

#[tokio::test]
async fn test_blocked_user_rejected_with_correct_password() {
    let app = app_with_alice().await;
    let auth = &app.state.auth;

    for _ in 0..5 {
        let _ = auth.authenticate("alice", "wrong", &client()).await;
    }

    let result = auth.authenticate("alice", "s3cret-pass", &client()).await;
    assert!(matches!(result, Err(AuthError::AccountLocked)));
    assert!(app.audit.count("login_blocked") >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_create_one_block() {
    let app = app_with_alice().await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let auth = Arc::clone(&app.state.auth);
        handles.push(tokio::spawn(async move {
            let client = ClientInfo::new(format!("198.51.100.{i}"));
            auth.authenticate("alice", "wrong", &client).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }

    assert_eq!(app.audit.count("username_blocked"), 1);
    assert_eq!(
        app.store
            .get("block:username:alice:history")
            .await
            .unwrap()
            .as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn test_session_threshold_only_warns() {
    let app = app_with_alice().await;
    let auth = &app.state.auth;
    let client = ClientInfo::new("192.0.2.20").with_session("sess-42");

    for _ in 0..3 {
        let _ = auth.authenticate("alice", "wrong", &client).await;
    }

    assert_eq!(app.audit.count("suspicious_session_activity"), 1);
    assert!(!app.store.exists("block:username:alice").await.unwrap());
    assert!(!app.store.exists("block:ip:192.0.2.20").await.unwrap());

    auth.authenticate("alice", "s3cret-pass", &client)
        .await
        .unwrap();
    assert!(!app
        .store
        .exists("auth_attempt:session:sess-42")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_encrypted_tokens_round_trip() {
    let mut config = test_config();
    config.auth.token_mode = TokenMode::Encrypted;
    let app = TestApp::with_config(config).await.unwrap();
    app.add_user("alice", "s3cret-pass", &["ADMIN"], &[])
        .await
        .unwrap();
    let auth = &app.state.auth;

    let issued = auth
        .authenticate("alice", "s3cret-pass", &client())
        .await
        .unwrap();
    assert_eq!(issued.token.split('.').count(), 5);

    let claims = auth.validate_token(&issued.token, &client()).await.unwrap();
    assert_eq!(claims.login, "alice");
    assert_eq!(claims.roles, vec!["ADMIN".to_string()]);

    auth.logout(&issued.token, &claims.sub, &client())
        .await
        .unwrap();
    assert!(matches!(
        auth.validate_token(&issued.token, &client()).await,
        Err(AuthError::TokenRevoked)
    ));
}

#[tokio::test]
async fn test_logout_all_keeps_existing_tokens_valid() {
    let app = app_with_alice().await;
    let auth = &app.state.auth;

    let issued = auth
        .authenticate("alice", "s3cret-pass", &client())
        .await
        .unwrap();
    auth.logout_all_sessions(&issued.claims.sub, "password_changed")
        .await
        .unwrap();

    let marker = app
        .state
        .revocations
        .user_marker(&issued.claims.sub)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(marker.reason, "password_changed");
    assert_eq!(marker.revoked_at_ms, usergate_api::testing::TEST_START_MS);

    // Marker only: individual tokens are not enumerated
    assert!(auth.validate_token(&issued.token, &client()).await.is_ok());
}
