//! Session token generation and validation
//!
//! Implements HMAC-SHA256 signed session tokens carrying identity and
//! authorization claims. Two interchangeable codecs exist behind
//! [`TokenCodec`]: [`SignedTokenCodec`] (plain JWT) and
//! [`EncryptedTokenCodec`](super::jwe::EncryptedTokenCodec) (the same JWT
//! inside an encrypted envelope). The variant is chosen once at startup by
//! [`build_codec`].

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use usergate_core::{AuthConfig, Clock, TokenMode};
use uuid::Uuid;

use super::jwe::EncryptedTokenCodec;

/// Claim names that custom claims may not override
pub const RESERVED_CLAIMS: &[&str] = &[
    "iss",
    "sub",
    "aud",
    "jti",
    "iat",
    "nbf",
    "exp",
    "login",
    "roles",
    "permissions",
];

/// Session token claims
///
/// These claims are embedded in the token and returned by verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// JWT ID - unique per issued token
    pub jti: String,
    /// Issued at timestamp (Unix epoch seconds)
    pub iat: i64,
    /// Expiration timestamp (Unix epoch seconds)
    pub exp: i64,
    /// Display login
    pub login: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Client metadata and other non-reserved claims
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl SessionClaims {
    pub fn expires_at_ms(&self) -> i64 {
        self.exp.saturating_mul(1000)
    }

    /// Identity part of the claims, as used to issue a replacement token
    pub fn identity(&self) -> TokenIdentity {
        TokenIdentity {
            subject: self.sub.clone(),
            login: self.login.clone(),
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Who a token is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub subject: String,
    pub login: String,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

/// A freshly issued token together with its claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// Token codec errors
#[derive(Debug, Error)]
pub enum TokenError {
    /// Malformed structure, bad signature or unsupported algorithm
    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token has expired")]
    Expired,

    #[error("Failed to encode token: {0}")]
    Encoding(String),
}

/// Issue and verify session tokens
pub trait TokenCodec: Send + Sync {
    /// Issue a token valid from now for the configured validity window
    fn issue(
        &self,
        identity: &TokenIdentity,
        custom: Map<String, Value>,
    ) -> Result<IssuedToken, TokenError>;

    /// Verify structure, signature and expiry
    fn verify(&self, token: &str) -> Result<SessionClaims, TokenError>;

    /// Re-issue a valid token with a fresh window. Custom claims are not carried over.
    fn refresh(&self, token: &str) -> Result<IssuedToken, TokenError> {
        let claims = self.verify(token)?;
        self.issue(&claims.identity(), Map::new())
    }
}

/// Build the codec selected by configuration
pub fn build_codec(
    config: &AuthConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn TokenCodec>, TokenError> {
    let signed = SignedTokenCodec::from_config(config, clock);
    match config.token_mode {
        TokenMode::Signed => Ok(Arc::new(signed)),
        TokenMode::Encrypted => Ok(Arc::new(EncryptedTokenCodec::new(
            signed,
            config.encryption_key_material().as_bytes(),
        )?)),
    }
}

/// HS256 signed JWT codec
pub struct SignedTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl SignedTokenCodec {
    pub fn new(secret: &[u8], issuer: &str, validity: Duration, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);
        // Expiry is checked against the injected clock instead
        validation.validate_exp = false;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: issuer.to_string(),
            validity,
            clock,
        }
    }

    pub fn from_config(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            &config.issuer,
            config.token_validity(),
            clock,
        )
    }
}

impl TokenCodec for SignedTokenCodec {
    fn issue(
        &self,
        identity: &TokenIdentity,
        mut custom: Map<String, Value>,
    ) -> Result<IssuedToken, TokenError> {
        custom.retain(|name, _| {
            let reserved = RESERVED_CLAIMS.contains(&name.as_str());
            if reserved {
                debug!("Dropping custom claim that shadows a reserved claim: {}", name);
            }
            !reserved
        });

        let now = self.clock.now_secs();
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            sub: identity.subject.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now.saturating_add(self.validity.as_secs() as i64),
            login: identity.login.clone(),
            roles: identity.roles.clone(),
            permissions: identity.permissions.clone(),
            custom,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let token_data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                use jsonwebtoken::errors::ErrorKind;
                match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::Invalid("bad signature".into()),
                    ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                        TokenError::Invalid("unsupported algorithm".into())
                    }
                    ErrorKind::InvalidIssuer => TokenError::Invalid("unexpected issuer".into()),
                    ErrorKind::MissingRequiredClaim(claim) => {
                        TokenError::Invalid(format!("missing claim {claim}"))
                    }
                    _ => TokenError::Invalid("malformed token".into()),
                }
            })?;

        let claims = token_data.claims;
        if claims.exp <= claims.iat {
            return Err(TokenError::Invalid("expiry precedes issue time".into()));
        }
        if self.clock.now_secs() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use usergate_core::ManualClock;

    const SECRET: &[u8] = b"test-secret-key-that-is-at-least-32-bytes";

    fn codec(clock: Arc<ManualClock>) -> SignedTokenCodec {
        SignedTokenCodec::new(SECRET, "usergate", Duration::from_secs(3600), clock)
    }

    fn identity() -> TokenIdentity {
        TokenIdentity {
            subject: Uuid::new_v4().to_string(),
            login: "alice".to_string(),
            roles: ["ADMIN".to_string()].into_iter().collect(),
            permissions: ["users:read".to_string(), "users:write".to_string()]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec(clock.clone());
        let identity = identity();

        let issued = codec.issue(&identity, Map::new()).unwrap();
        let claims = codec.verify(&issued.token).unwrap();

        assert_eq!(claims.identity(), identity);
        assert_eq!(claims.iss, "usergate");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert_eq!(claims, issued.claims);
        assert!(claims.has_role("ADMIN"));
        assert!(claims.has_permission("users:write"));
    }

    #[test]
    fn test_token_expires_after_validity_window() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec(clock.clone());
        let issued = codec.issue(&identity(), Map::new()).unwrap();

        clock.advance(Duration::from_secs(3599));
        assert!(codec.verify(&issued.token).is_ok());

        clock.advance(Duration::from_secs(1));
        assert!(matches!(
            codec.verify(&issued.token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec1 = codec(clock.clone());
        let codec2 = SignedTokenCodec::new(
            b"another-secret-key-that-is-32-bytes!!",
            "usergate",
            Duration::from_secs(3600),
            clock,
        );

        let issued = codec1.issue(&identity(), Map::new()).unwrap();
        let result = codec2.verify(&issued.token);
        assert!(matches!(result, Err(TokenError::Invalid(reason)) if reason == "bad signature"));
    }

    #[test]
    fn test_malformed_token() {
        let codec = codec(Arc::new(ManualClock::starting_now()));
        assert!(matches!(
            codec.verify("invalid.token.here"),
            Err(TokenError::Invalid(_))
        ));
        assert!(matches!(codec.verify(""), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec(clock.clone());
        let now = clock.now_secs();
        let claims = serde_json::json!({
            "iss": "usergate", "sub": "u1", "jti": "j", "iat": now, "exp": now + 60,
            "login": "alice",
        });
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert!(matches!(
            codec.verify(&token),
            Err(TokenError::Invalid(reason)) if reason == "unsupported algorithm"
        ));
    }

    #[test]
    fn test_custom_claims_cannot_shadow_reserved() {
        let codec = codec(Arc::new(ManualClock::starting_now()));
        let mut custom = Map::new();
        custom.insert("sub".to_string(), Value::from("someone-else"));
        custom.insert("roles".to_string(), serde_json::json!(["SUPERUSER"]));
        custom.insert("client_info".to_string(), Value::from("10.0.0.1"));

        let identity = identity();
        let issued = codec.issue(&identity, custom).unwrap();
        let claims = codec.verify(&issued.token).unwrap();

        assert_eq!(claims.sub, identity.subject);
        assert!(!claims.has_role("SUPERUSER"));
        assert_eq!(claims.custom.get("client_info"), Some(&Value::from("10.0.0.1")));
        assert!(!claims.custom.contains_key("sub"));
    }

    #[test]
    fn test_refresh_issues_new_window_without_custom_claims() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec(clock.clone());
        let mut custom = Map::new();
        custom.insert("auth_time".to_string(), Value::from(1_700_000_000_000i64));
        let original = codec.issue(&identity(), custom).unwrap();

        clock.advance(Duration::from_secs(1800));
        let refreshed = codec.refresh(&original.token).unwrap();

        assert_ne!(refreshed.token, original.token);
        assert_eq!(refreshed.claims.identity(), original.claims.identity());
        assert_eq!(refreshed.claims.exp, original.claims.exp + 1800);
        assert!(refreshed.claims.custom.is_empty());
    }

    #[test]
    fn test_refresh_propagates_expiry() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec(clock.clone());
        let original = codec.issue(&identity(), Map::new()).unwrap();

        clock.advance(Duration::from_secs(7200));
        assert!(matches!(
            codec.refresh(&original.token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_same_second_tokens_are_distinct() {
        let codec = codec(Arc::new(ManualClock::new(1_700_000_000_000)));
        let identity = identity();
        let a = codec.issue(&identity, Map::new()).unwrap();
        let b = codec.issue(&identity, Map::new()).unwrap();
        assert_ne!(a.token, b.token);
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_identity(
            login in "[a-z][a-z0-9_.]{0,20}",
            roles in prop::collection::btree_set("[A-Z_]{1,12}", 0..5),
            permissions in prop::collection::btree_set("[a-z]{1,8}:[a-z]{1,8}", 0..8),
        ) {
            let codec = codec(Arc::new(ManualClock::new(1_700_000_000_000)));
            let identity = TokenIdentity {
                subject: Uuid::new_v4().to_string(),
                login,
                roles,
                permissions,
            };
            let issued = codec.issue(&identity, Map::new()).unwrap();
            let claims = codec.verify(&issued.token).unwrap();
            prop_assert_eq!(claims.identity(), identity);
        }
    }
}
