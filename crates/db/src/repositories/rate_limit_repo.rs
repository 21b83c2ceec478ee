//! Repository for the `ops_abuse_counters` table.

use sqlx::{PgConnection, PgPool};
use warden_core::rate_limit::RateLimitCounter;
use warden_core::types::EpochMillis;

use crate::models::rate_limit::CounterRow;

pub struct RateLimitRepo;

impl RateLimitRepo {
    /// Create a fresh counter for `key` unless one exists.
    pub async fn ensure(
        conn: &mut PgConnection,
        key: &str,
        now_ms: EpochMillis,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO ops_abuse_counters (key, count, window_started_ms, reclaimable_at_ms)
             VALUES ($1, 0, $2, $2)
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(now_ms)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Read a counter and hold its row lock until the transaction ends.
    pub async fn lock(conn: &mut PgConnection, key: &str) -> Result<CounterRow, sqlx::Error> {
        sqlx::query_as::<_, CounterRow>(
            "SELECT count, window_started_ms, blocked_until_ms
             FROM ops_abuse_counters WHERE key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_one(conn)
        .await
    }

    pub async fn save(
        conn: &mut PgConnection,
        key: &str,
        counter: &RateLimitCounter,
        reclaimable_at_ms: EpochMillis,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE ops_abuse_counters
             SET count = $2, window_started_ms = $3, blocked_until_ms = $4,
                 reclaimable_at_ms = $5, updated_at = NOW()
             WHERE key = $1",
        )
        .bind(key)
        .bind(i32::try_from(counter.count).unwrap_or(i32::MAX))
        .bind(counter.window_started_ms)
        .bind(counter.blocked_until_ms)
        .bind(reclaimable_at_ms)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Delete counters that no longer affect any decision at `now_ms`.
    pub async fn delete_reclaimable(pool: &PgPool, now_ms: EpochMillis) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM ops_abuse_counters WHERE reclaimable_at_ms <= $1")
            .bind(now_ms)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
