//! Counter row from the `ops_abuse_counters` table.

use sqlx::FromRow;
use warden_core::error::StoreError;
use warden_core::rate_limit::RateLimitCounter;

#[derive(Debug, Clone, FromRow)]
pub struct CounterRow {
    pub count: i32,
    pub window_started_ms: i64,
    pub blocked_until_ms: Option<i64>,
}

impl TryFrom<CounterRow> for RateLimitCounter {
    type Error = StoreError;

    fn try_from(row: CounterRow) -> Result<Self, Self::Error> {
        let count = u32::try_from(row.count)
            .map_err(|_| StoreError::Corrupt(format!("negative counter value {}", row.count)))?;
        Ok(Self {
            count,
            window_started_ms: row.window_started_ms,
            blocked_until_ms: row.blocked_until_ms,
        })
    }
}
