use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_cache::RedisTtlCache;
use warden_core::clock::{Clock, SystemClock};
use warden_core::rate_limit::{
    FailureMode, MemoryRateLimitStore, RateLimitStore, TtlCacheRateLimitStore,
};
use warden_core::session::MemorySessionStore;
use warden_core::users::MemoryUserDirectory;
use warden_core::visitor::MemoryVisitorStore;
use warden_db::stores::{PgRateLimitStore, PgSessionStore, PgUserDirectory, PgVisitorStore};
use warden_db::DbPool;

use warden_api::background::{abuse_counter_reaper, retention::RetentionJob};
use warden_api::config::{RateLimitBackend, ServerConfig, StoreBackend};
use warden_api::router::build_app_router;
use warden_api::state::{AppState, Backends};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        store_backend = ?config.store_backend,
        rate_limit_backend = ?config.rate_limit_backend,
        "Loaded server configuration"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // --- Database ---
    let pool = connect_database(&config).await?;

    // --- Backends ---
    let backends = build_backends(&config, pool.as_ref(), Arc::clone(&clock)).await?;
    let rate_limits = Arc::clone(&backends.rate_limits);
    let sessions = Arc::clone(&backends.sessions);
    let visitors = Arc::clone(&backends.visitors);

    match rate_limits.failure_mode() {
        FailureMode::FailClosed => tracing::info!(
            backend = rate_limits.backend_name(),
            failure_mode = FailureMode::FailClosed.as_str(),
            "Rate limiter configured; requests are rejected while its store is unavailable"
        ),
        FailureMode::FailOpen => tracing::warn!(
            backend = rate_limits.backend_name(),
            failure_mode = FailureMode::FailOpen.as_str(),
            "Rate limiter configured; requests are allowed while its store is unavailable"
        ),
    }

    // --- Background jobs ---
    let cancel = CancellationToken::new();

    let reaper_handle = tokio::spawn(abuse_counter_reaper::run(
        rate_limits,
        Arc::clone(&clock),
        Duration::from_secs(config.counter_reap_interval_secs),
        cancel.clone(),
    ));

    let retention = RetentionJob {
        sessions,
        visitors,
        clock: Arc::clone(&clock),
        retention_days: config.retention_days,
    };
    let retention_handle = tokio::spawn(retention.run(cancel.clone()));

    // --- App state + router ---
    let state = AppState::new(config.clone(), backends);
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(drain, reaper_handle).await;
    let _ = tokio::time::timeout(drain, retention_handle).await;
    tracing::info!("Background jobs stopped");

    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database pool closed");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Connect, check and migrate the database when any postgres backend is selected.
async fn connect_database(config: &ServerConfig) -> anyhow::Result<Option<DbPool>> {
    let needed = config.store_backend == StoreBackend::Postgres
        || config.rate_limit_backend == RateLimitBackend::Postgres;
    if !needed {
        return Ok(None);
    }

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;

    let pool = warden_db::create_pool(database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    warden_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    warden_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

async fn build_backends(
    config: &ServerConfig,
    pool: Option<&DbPool>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Backends> {
    let rate_limits: Arc<dyn RateLimitStore> = match config.rate_limit_backend {
        RateLimitBackend::Postgres => {
            let pool = pool.context("postgres rate limiting needs a database")?;
            Arc::new(PgRateLimitStore::new(pool.clone()))
        }
        RateLimitBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("REDIS_URL must be set")?;
            let cache = RedisTtlCache::new(url).context("Invalid REDIS_URL")?;
            if let Err(e) = cache.ping().await {
                tracing::warn!(error = %e, "Redis unreachable at startup; rate limiting fails open");
            }
            Arc::new(TtlCacheRateLimitStore::new(cache))
        }
        RateLimitBackend::Memory => Arc::new(MemoryRateLimitStore::new()),
    };

    let backends = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = pool.context("postgres store needs a database")?;
            Backends {
                sessions: Arc::new(PgSessionStore::new(pool.clone())),
                users: Arc::new(PgUserDirectory::new(pool.clone())),
                rate_limits,
                visitors: Arc::new(PgVisitorStore::new(pool.clone())),
                clock,
            }
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; state is lost on restart and no users exist");
            Backends {
                sessions: Arc::new(MemorySessionStore::new()),
                users: Arc::new(MemoryUserDirectory::new()),
                rate_limits,
                visitors: Arc::new(MemoryVisitorStore::new()),
                clock,
            }
        }
    };
    Ok(backends)
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
