//! Encrypted token envelope
//!
//! Wraps a signed session token in JWE compact serialization so the claims are
//! opaque to clients:
//!
//! ```text
//! BASE64URL(header) . "" . BASE64URL(iv) . BASE64URL(ciphertext) . BASE64URL(tag)
//! ```
//!
//! The header is always `{"alg":"dir","enc":"A256GCM","cty":"JWT"}`; the
//! encoded header is the AES-GCM additional authenticated data. The content
//! key is the SHA-256 digest of the configured key material.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::token::{
    IssuedToken, SessionClaims, SignedTokenCodec, TokenCodec, TokenError, TokenIdentity,
};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
}

/// Signed token codec wrapped in an AES-256-GCM envelope
pub struct EncryptedTokenCodec {
    inner: SignedTokenCodec,
    cipher: Aes256Gcm,
    encoded_header: String,
}

impl EncryptedTokenCodec {
    pub fn new(inner: SignedTokenCodec, key_material: &[u8]) -> Result<Self, TokenError> {
        let key = Sha256::digest(key_material);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| TokenError::Encoding(format!("invalid content key: {e}")))?;

        let header = JweHeader {
            alg: "dir".to_string(),
            enc: "A256GCM".to_string(),
            cty: Some("JWT".to_string()),
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|e| TokenError::Encoding(e.to_string()))?;

        Ok(Self {
            inner,
            cipher,
            encoded_header: URL_SAFE_NO_PAD.encode(header_json),
        })
    }

    fn seal(&self, signed: &str) -> Result<String, TokenError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: signed.as_bytes(),
                    aad: self.encoded_header.as_bytes(),
                },
            )
            .map_err(|e| TokenError::Encoding(format!("AES-GCM failed: {e}")))?;

        // aes-gcm appends the tag to the ciphertext
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}..{}.{}.{}",
            self.encoded_header,
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag),
        ))
    }

    fn open(&self, token: &str) -> Result<String, TokenError> {
        let parts: Vec<&str> = token.split('.').collect();
        let [header_b64, encrypted_key, iv_b64, ciphertext_b64, tag_b64] = parts.as_slice() else {
            return Err(TokenError::Invalid("malformed envelope".into()));
        };
        if !encrypted_key.is_empty() {
            return Err(TokenError::Invalid("unsupported algorithm".into()));
        }

        let header: JweHeader = decode_part(header_b64)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| TokenError::Invalid("malformed envelope header".into()))?;
        if header.alg != "dir" || header.enc != "A256GCM" {
            return Err(TokenError::Invalid("unsupported algorithm".into()));
        }

        let malformed = || TokenError::Invalid("malformed envelope".into());
        let iv = decode_part(iv_b64).filter(|iv| iv.len() == NONCE_LEN).ok_or_else(malformed)?;
        let tag = decode_part(tag_b64).filter(|t| t.len() == TAG_LEN).ok_or_else(malformed)?;
        let mut sealed = decode_part(ciphertext_b64).ok_or_else(malformed)?;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: header_b64.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Invalid("envelope authentication failed".into()))?;

        String::from_utf8(plaintext).map_err(|_| TokenError::Invalid("malformed envelope".into()))
    }
}

fn decode_part(part: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(part).ok()
}

impl TokenCodec for EncryptedTokenCodec {
    fn issue(
        &self,
        identity: &TokenIdentity,
        custom: Map<String, Value>,
    ) -> Result<IssuedToken, TokenError> {
        let signed = self.inner.issue(identity, custom)?;
        Ok(IssuedToken {
            token: self.seal(&signed.token)?,
            claims: signed.claims,
        })
    }

    fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let signed = self.open(token)?;
        self.inner.verify(&signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use usergate_core::ManualClock;

    const SECRET: &[u8] = b"test-secret-key-that-is-at-least-32-bytes";

    fn codec_with(clock: Arc<ManualClock>, key: &[u8]) -> EncryptedTokenCodec {
        let inner = SignedTokenCodec::new(SECRET, "usergate", Duration::from_secs(3600), clock);
        EncryptedTokenCodec::new(inner, key).unwrap()
    }

    fn identity() -> TokenIdentity {
        TokenIdentity {
            subject: "user-1".to_string(),
            login: "alice".to_string(),
            roles: ["USER".to_string()].into_iter().collect(),
            permissions: Default::default(),
        }
    }

    #[test]
    fn test_envelope_round_trip() {
        let codec = codec_with(Arc::new(ManualClock::starting_now()), b"envelope-key");
        let issued = codec.issue(&identity(), Map::new()).unwrap();

        let parts: Vec<&str> = issued.token.split('.').collect();
        assert_eq!(parts.len(), 5);
        assert!(parts[1].is_empty());

        let claims = codec.verify(&issued.token).unwrap();
        assert_eq!(claims.identity(), identity());
    }

    #[test]
    fn test_claims_are_opaque() {
        let codec = codec_with(Arc::new(ManualClock::starting_now()), b"envelope-key");
        let issued = codec.issue(&identity(), Map::new()).unwrap();
        let ciphertext = issued.token.split('.').nth(3).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(ciphertext).unwrap();
        // A plain inner JWT would start with its base64url JSON header
        assert!(!raw.starts_with(b"eyJ"));
    }

    #[test]
    fn test_header_is_authenticated() {
        let codec = codec_with(Arc::new(ManualClock::starting_now()), b"envelope-key");
        let issued = codec.issue(&identity(), Map::new()).unwrap();

        let forged_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"dir","enc":"A256GCM"}"#);
        let mut parts: Vec<&str> = issued.token.split('.').collect();
        parts[0] = &forged_header;
        let forged = parts.join(".");

        assert!(matches!(codec.verify(&forged), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let issuer = codec_with(clock.clone(), b"key-one");
        let verifier = codec_with(clock, b"key-two");
        let issued = issuer.issue(&identity(), Map::new()).unwrap();

        assert!(matches!(
            verifier.verify(&issued.token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_plain_jwt_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let plain =
            SignedTokenCodec::new(SECRET, "usergate", Duration::from_secs(3600), clock.clone());
        let token = plain.issue(&identity(), Map::new()).unwrap().token;

        let codec = codec_with(clock, b"envelope-key");
        assert!(matches!(codec.verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_expiry_passes_through_envelope() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec_with(clock.clone(), b"envelope-key");
        let issued = codec.issue(&identity(), Map::new()).unwrap();

        clock.advance(Duration::from_secs(3600));
        assert!(matches!(codec.verify(&issued.token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_refresh_through_envelope() {
        let codec = codec_with(Arc::new(ManualClock::starting_now()), b"envelope-key");
        let issued = codec.issue(&identity(), Map::new()).unwrap();
        let refreshed = codec.refresh(&issued.token).unwrap();

        assert_eq!(refreshed.token.split('.').count(), 5);
        assert_eq!(codec.verify(&refreshed.token).unwrap().identity(), identity());
    }
}
