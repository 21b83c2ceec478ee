use std::str::FromStr;

use chrono::Duration;
use warden_core::rate_limit::RateLimitPolicy;
use warden_core::visitor::VisitPolicy;

use crate::auth::jwt::JwtConfig;

/// Where sessions, users and visitor records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

/// Which counter backend the abuse guard uses.
///
/// `Postgres` and `Memory` are transactional and fail closed; `Redis` is a
/// TTL cache and fails open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Postgres,
    Redis,
    Memory,
}

impl FromStr for RateLimitBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown rate limit backend '{other}'")),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long background jobs get to stop after the server does.
    pub shutdown_timeout_secs: u64,
    /// JWT token configuration (secret, expiry durations).
    pub jwt: JwtConfig,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub rate_limit_backend: RateLimitBackend,
    pub redis_url: Option<String>,
    /// Policy for `POST /auth/login`.
    pub login_rate_limit: RateLimitPolicy,
    /// Policy for `POST /auth/refresh`.
    pub refresh_rate_limit: RateLimitPolicy,
    pub visit_policy: VisitPolicy,
    /// Salt for hashing client IPs and user agents.
    pub identity_hash_salt: String,
    /// Age past expiry after which sessions and visitor records are deleted.
    pub retention_days: i64,
    /// How often stale rate-limit counters are reaped.
    pub counter_reap_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                    |
    /// |--------------------------------|----------------------------|
    /// | `HOST`                         | `0.0.0.0`                  |
    /// | `PORT`                         | `3000`                     |
    /// | `CORS_ORIGINS`                 | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`         | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`        | `30`                       |
    /// | `STORE_BACKEND`                | `postgres`                 |
    /// | `DATABASE_URL`                 | -- (required for postgres) |
    /// | `RATE_LIMIT_BACKEND`           | `postgres`                 |
    /// | `REDIS_URL`                    | -- (required for redis)    |
    /// | `LOGIN_RATE_LIMIT`             | `5`                        |
    /// | `LOGIN_RATE_WINDOW_SECS`       | `300`                      |
    /// | `LOGIN_RATE_PENALTY_SECS`      | `900`                      |
    /// | `REFRESH_RATE_LIMIT`           | `30`                       |
    /// | `REFRESH_RATE_WINDOW_SECS`     | `60`                       |
    /// | `REFRESH_RATE_PENALTY_SECS`    | `300`                      |
    /// | `VISITOR_SESSION_TIMEOUT_SECS` | `1800`                     |
    /// | `VISITOR_WRITE_THROTTLE_MS`    | `7000`                     |
    /// | `VISITOR_MAX_SESSION_HOURS`    | `24`                       |
    /// | `IDENTITY_HASH_SALT`           | -- (required)              |
    /// | `RETENTION_DAYS`               | `30`                       |
    /// | `COUNTER_REAP_INTERVAL_SECS`   | `600`                      |
    ///
    /// # Panics
    ///
    /// Panics on unparseable values, on zero rate-limit fields and on a
    /// missing URL for a selected backend, so misconfiguration fails at
    /// startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_or("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs: u64 = env_or("SHUTDOWN_TIMEOUT_SECS", 30);

        let store_backend: StoreBackend = env_or("STORE_BACKEND", StoreBackend::Postgres);
        let rate_limit_backend: RateLimitBackend =
            env_or("RATE_LIMIT_BACKEND", RateLimitBackend::Postgres);

        let database_url = std::env::var("DATABASE_URL").ok();
        let needs_database = store_backend == StoreBackend::Postgres
            || rate_limit_backend == RateLimitBackend::Postgres;
        assert!(
            !needs_database || database_url.is_some(),
            "DATABASE_URL must be set when a postgres backend is selected"
        );

        let redis_url = std::env::var("REDIS_URL").ok();
        assert!(
            rate_limit_backend != RateLimitBackend::Redis || redis_url.is_some(),
            "REDIS_URL must be set when RATE_LIMIT_BACKEND=redis"
        );

        let login_rate_limit = policy_from_env("LOGIN", RateLimitPolicy::new(5, 300, 900));
        let refresh_rate_limit = policy_from_env("REFRESH", RateLimitPolicy::new(30, 60, 300));

        let visit_policy = VisitPolicy {
            session_timeout: Duration::seconds(env_or("VISITOR_SESSION_TIMEOUT_SECS", 1800)),
            write_throttle: Duration::milliseconds(env_or("VISITOR_WRITE_THROTTLE_MS", 7000)),
            max_session_duration: Duration::hours(env_or("VISITOR_MAX_SESSION_HOURS", 24)),
            ..VisitPolicy::default()
        };

        let identity_hash_salt = std::env::var("IDENTITY_HASH_SALT")
            .expect("IDENTITY_HASH_SALT must be set in the environment");
        assert!(
            !identity_hash_salt.is_empty(),
            "IDENTITY_HASH_SALT must not be empty"
        );

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            store_backend,
            database_url,
            rate_limit_backend,
            redis_url,
            login_rate_limit,
            refresh_rate_limit,
            visit_policy,
            identity_hash_salt,
            retention_days: env_or("RETENTION_DAYS", 30),
            counter_reap_interval_secs: env_or("COUNTER_REAP_INTERVAL_SECS", 600),
        }
    }
}

/// Read `{prefix}_RATE_LIMIT`, `{prefix}_RATE_WINDOW_SECS` and
/// `{prefix}_RATE_PENALTY_SECS`. Panics unless every field is positive.
fn policy_from_env(prefix: &str, default: RateLimitPolicy) -> RateLimitPolicy {
    let policy = RateLimitPolicy::new(
        env_or(&format!("{prefix}_RATE_LIMIT"), default.limit),
        env_or(&format!("{prefix}_RATE_WINDOW_SECS"), default.window_secs),
        env_or(&format!("{prefix}_RATE_PENALTY_SECS"), default.penalty_secs),
    );
    if let Err(e) = policy.validate() {
        panic!("{prefix}_RATE_* is invalid: {e}");
    }
    policy
}

/// Parse `name` from the environment, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} is invalid ('{raw}'): {e}")),
        Err(_) => default,
    }
}
