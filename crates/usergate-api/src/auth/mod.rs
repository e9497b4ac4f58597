//! Authentication and session revocation
//!
//! This module provides the authentication core:
//! - Token codec (signed JWT, optionally inside an encrypted envelope)
//! - Revocation list backed by the shared key-value store
//! - Brute-force guard with escalating blocks
//! - Authentication service composing the above
//! - Credential and permission store adapters
//! - Middleware for request authentication

pub mod brute_force;
pub mod credentials;
pub mod jwe;
pub mod middleware;
pub mod password;
pub mod revocation;
pub mod service;
pub mod token;

pub use brute_force::{escalated_block_duration, BlockScope, BruteForceGuard};
pub use credentials::{
    AccountRecord, CredentialError, CredentialStore, InMemoryAccountStore, PermissionStore,
    PgAccountStore,
};
pub use jwe::EncryptedTokenCodec;
pub use middleware::{auth_middleware, bearer_token, AuthenticatedUser};
pub use password::{hash_password_with_config, verify_password, PasswordConfig, PasswordError};
pub use revocation::{
    hash_token, spawn_size_reporter, KvRevocationStore, RevocationError, RevocationStore,
    UserRevocationMarker,
};
pub use service::{AuthComponents, AuthError, AuthService};
pub use token::{
    build_codec, IssuedToken, SessionClaims, SignedTokenCodec, TokenCodec, TokenError,
    TokenIdentity,
};
