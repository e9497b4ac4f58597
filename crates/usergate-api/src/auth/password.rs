/// Password hashing and verification using Argon2id
///
/// Stored hashes are PHC strings, so the parameters and salt travel with the
/// hash and verification does not need the configuration that produced it.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use thiserror::Error;
use usergate_core::PasswordHashConfig;

// Fixed salt and digest of the placeholder hash; no password matches them
const PLACEHOLDER_SALT: &str = "dXNlcmdhdGUtdW5rbm93bg";
const PLACEHOLDER_DIGEST: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Argon2id cost parameters
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Iterations (default: 3)
    pub time_cost: u32,
    /// Lanes (default: 4)
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl PasswordConfig {
    /// Cheap parameters for fixtures; never use for real accounts
    pub fn insecure_fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// PHC string with these parameters that no password verifies against
    ///
    /// Checking it costs the same as checking a real hash of this cost, so a
    /// login for an unknown account takes as long as a wrong password.
    pub fn placeholder_hash(&self) -> String {
        format!(
            "$argon2id$v=19$m={},t={},p={}${PLACEHOLDER_SALT}${PLACEHOLDER_DIGEST}",
            self.memory_cost, self.time_cost, self.parallelism
        )
    }

    fn argon2(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(32))
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }
}

impl From<&PasswordHashConfig> for PasswordConfig {
    fn from(config: &PasswordHashConfig) -> Self {
        Self {
            memory_cost: config.memory_cost_kib,
            time_cost: config.time_cost,
            parallelism: config.parallelism,
        }
    }
}

/// Hash a plaintext password into a PHC string
pub fn hash_password_with_config(
    password: &str,
    config: &PasswordConfig,
) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = config
        .argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check a plaintext password against a stored PHC hash
///
/// `Ok(false)` means a well-formed hash that does not match.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}
