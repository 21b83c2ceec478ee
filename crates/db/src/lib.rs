//! PostgreSQL persistence for warden.
//!
//! [`repositories`] hold the SQL; [`stores`] adapt them to the store traits
//! defined in `warden-core`.

use sqlx::postgres::PgPoolOptions;
use warden_core::error::StoreError;

pub mod models;
pub mod repositories;
pub mod stores;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply all pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Translate a driver error into the backend-neutral [`StoreError`].
///
/// Unique violations (SQLSTATE 23505) become [`StoreError::Conflict`];
/// everything else is treated as the store being unavailable.
pub fn to_store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or("unknown");
            return StoreError::Conflict(format!("unique constraint {constraint}"));
        }
    }
    tracing::error!(error = %err, "Database error");
    StoreError::unavailable(err)
}
