//! usergate CLI - Operator command-line interface
//!
//! Usage:
//!   usergate hash-password [password]
//!   usergate revoke-user <user-id> [--reason <reason>]
//!   usergate revocations

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use usergate_api::auth::{
    hash_password_with_config, KvRevocationStore, PasswordConfig, RevocationStore,
};
use usergate_core::{AppConfig, Clock, StoreBackend, SystemClock};
use usergate_store::{KeyValueStore, MemoryStore, RedisStore};

#[derive(Parser)]
#[command(name = "usergate")]
#[command(about = "usergate operator CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, env = "USERGATE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print an Argon2id hash, at the configured cost, for seeding an account
    HashPassword {
        /// Password to hash; read from stdin when omitted
        password: Option<String>,
    },
    /// Record a mass-revocation marker for a user
    RevokeUser {
        user_id: String,
        #[arg(long, default_value = "admin_revoked")]
        reason: String,
    },
    /// Print the number of live revocation entries
    Revocations,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

async fn revocation_store(config: &AppConfig) -> anyhow::Result<KvRevocationStore> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn KeyValueStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(
                &config.store.redis_url,
                config.store.op_timeout(),
                &config.store.key_prefix,
            )
            .await
            .context("Failed to connect to Redis")?,
        ),
        StoreBackend::Memory => {
            warn!("In-memory store selected: changes are lost when this command exits");
            Arc::new(MemoryStore::new(clock.clone()))
        }
    };
    Ok(KvRevocationStore::new(
        store,
        clock,
        config.revocation.clone(),
    ))
}

fn read_password_line() -> anyhow::Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    anyhow::ensure!(!password.is_empty(), "Password must not be empty");
    Ok(password)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::HashPassword { password } => {
            let config = load_config(cli.config.as_ref())?;
            let cost = PasswordConfig::from(&config.password);
            let password = match password {
                Some(password) => password,
                None => read_password_line()?,
            };
            let hash =
                tokio::task::spawn_blocking(move || hash_password_with_config(&password, &cost))
                    .await??;
            println!("{}", hash);
        }
        Commands::RevokeUser { user_id, reason } => {
            let config = load_config(cli.config.as_ref())?;
            let revocations = revocation_store(&config).await?;
            revocations.revoke_all_for_user(&user_id, &reason).await?;
            println!("Revoked all sessions of {} (reason: {})", user_id, reason);
        }
        Commands::Revocations => {
            let config = load_config(cli.config.as_ref())?;
            let revocations = revocation_store(&config).await?;
            println!("{}", revocations.size().await?);
        }
    }

    Ok(())
}
