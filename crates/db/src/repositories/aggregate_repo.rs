//! Repository for the `ops_daily_agg`, `ops_hourly_agg` and
//! `ops_daily_buckets` counter tables.

use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use warden_core::visitor::{AggregateDelta, CounterTotals};

pub struct AggregateRepo;

impl AggregateRepo {
    /// Add one visit's increments to every counter table.
    pub async fn apply(conn: &mut PgConnection, delta: &AggregateDelta) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO ops_daily_agg (day, requests, sessions_started, unique_visitors_approx)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (day) DO UPDATE
             SET requests = ops_daily_agg.requests + EXCLUDED.requests,
                 sessions_started = ops_daily_agg.sessions_started + EXCLUDED.sessions_started,
                 unique_visitors_approx =
                     ops_daily_agg.unique_visitors_approx + EXCLUDED.unique_visitors_approx",
        )
        .bind(delta.day)
        .bind(delta.requests)
        .bind(delta.sessions_started)
        .bind(delta.unique_visitors_approx)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO ops_hourly_agg (day, hour, requests, sessions_started, unique_visitors_approx)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (day, hour) DO UPDATE
             SET requests = ops_hourly_agg.requests + EXCLUDED.requests,
                 sessions_started = ops_hourly_agg.sessions_started + EXCLUDED.sessions_started,
                 unique_visitors_approx =
                     ops_hourly_agg.unique_visitors_approx + EXCLUDED.unique_visitors_approx",
        )
        .bind(delta.day)
        .bind(delta.hour as i16)
        .bind(delta.requests)
        .bind(delta.sessions_started)
        .bind(delta.unique_visitors_approx)
        .execute(&mut *conn)
        .await?;

        for (dimension, bucket) in delta.buckets() {
            sqlx::query(
                "INSERT INTO ops_daily_buckets (day, dimension, bucket, count)
                 VALUES ($1, $2, $3, 1)
                 ON CONFLICT (day, dimension, bucket) DO UPDATE
                 SET count = ops_daily_buckets.count + 1",
            )
            .bind(delta.day)
            .bind(dimension)
            .bind(bucket)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn daily(pool: &PgPool, day: NaiveDate) -> Result<CounterTotals, sqlx::Error> {
        let row = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT requests, sessions_started, unique_visitors_approx
             FROM ops_daily_agg WHERE day = $1",
        )
        .bind(day)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(totals).unwrap_or_default())
    }

    pub async fn hourly(
        pool: &PgPool,
        day: NaiveDate,
        hour: u32,
    ) -> Result<CounterTotals, sqlx::Error> {
        let row = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT requests, sessions_started, unique_visitors_approx
             FROM ops_hourly_agg WHERE day = $1 AND hour = $2",
        )
        .bind(day)
        .bind(hour as i16)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(totals).unwrap_or_default())
    }

    pub async fn bucket(
        pool: &PgPool,
        day: NaiveDate,
        dimension: &str,
        bucket: &str,
    ) -> Result<i64, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT count FROM ops_daily_buckets
             WHERE day = $1 AND dimension = $2 AND bucket = $3",
        )
        .bind(day)
        .bind(dimension)
        .bind(bucket)
        .fetch_optional(pool)
        .await?;
        Ok(count.unwrap_or(0))
    }
}

fn totals((requests, sessions_started, unique_visitors_approx): (i64, i64, i64)) -> CounterTotals {
    CounterTotals {
        requests,
        sessions_started,
        unique_visitors_approx,
    }
}
