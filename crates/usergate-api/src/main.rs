//! usergate API Server
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use usergate_api::audit::TracingAuditSink;
use usergate_api::auth::{spawn_size_reporter, InMemoryAccountStore, PgAccountStore};
use usergate_api::create_router;
use usergate_api::state::{AppState, Backends};
use usergate_core::{AppConfig, Clock, LoggingConfig, StoreBackend, SystemClock};
use usergate_store::{KeyValueStore, MemoryStore, RedisStore};

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("USERGATE_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "usergate_api={0},usergate_store={0},audit=info,tower_http=info",
            logging.level
        ))
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_backends(config: &AppConfig) -> anyhow::Result<Backends> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match config.store.backend {
        StoreBackend::Redis => {
            let kv_store: Arc<dyn KeyValueStore> = Arc::new(
                RedisStore::connect(
                    &config.store.redis_url,
                    config.store.op_timeout(),
                    &config.store.key_prefix,
                )
                .await
                .context("Failed to connect to Redis")?,
            );
            let accounts = Arc::new(
                PgAccountStore::connect(&config.database)
                    .await
                    .context("Failed to connect to PostgreSQL")?,
            );
            Ok(Backends {
                kv_store,
                credentials: accounts.clone(),
                permissions: accounts,
                audit: Arc::new(TracingAuditSink),
                clock,
            })
        }
        StoreBackend::Memory => {
            warn!("In-memory store: counters and revocations are not shared between instances");
            let accounts =
                Arc::new(InMemoryAccountStore::from_seed(&config.database.seed_accounts).await);
            Ok(Backends {
                kv_store: Arc::new(MemoryStore::new(clock.clone())),
                credentials: accounts.clone(),
                permissions: accounts,
                audit: Arc::new(TracingAuditSink),
                clock,
            })
        }
    }
}

/// Wait for Ctrl-C, then report not-ready while in-flight requests drain
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    state.set_ready(false);
    info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let backends = build_backends(&config).await?;
    let state = Arc::new(AppState::new(config, backends)?);

    let _reporter = spawn_size_reporter(
        state.revocations.clone(),
        state.metrics.clone(),
        state.config.revocation.size_report_interval(),
    );

    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("usergate API Server starting on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui/", addr);
    info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    // Peer addresses back the client IP when no proxy header is present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state))
    .await?;

    Ok(())
}
