//! usergate core - configuration and shared primitives
//!
//! This crate defines the pieces every other usergate crate depends on:
//! - Configuration management (environment, TOML file, validation)
//! - The clock abstraction used for all expiry arithmetic
//! - Fail-open / fail-closed policy selection for store failures

pub mod clock;
pub mod config;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, AuthConfig, BruteForceConfig, ConfigError, DatabaseConfig, FailPolicy,
    LoggingConfig, PasswordHashConfig, RevocationConfig, SeedAccount, ServerConfig,
    StoreBackend, StoreConfig, TokenMode,
};
