//! The fixed-window-with-penalty algorithm, independent of storage.

use serde::{Deserialize, Serialize};

use super::{RateLimitDecision, RateLimitPolicy};
use crate::types::EpochMillis;

/// Persisted counter state for one `{route}:{identity}` key.
///
/// `count` never exceeds `limit + 1` before a reset: once the limit is crossed
/// a penalty lock is set and further calls are rejected without touching the
/// count until the lock elapses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCounter {
    pub count: u32,
    pub window_started_ms: EpochMillis,
    pub blocked_until_ms: Option<EpochMillis>,
}

impl RateLimitCounter {
    pub fn fresh(now_ms: EpochMillis) -> Self {
        Self {
            count: 0,
            window_started_ms: now_ms,
            blocked_until_ms: None,
        }
    }

    /// Record one request at `now_ms` and return the decision.
    pub fn record(&mut self, policy: &RateLimitPolicy, now_ms: EpochMillis) -> RateLimitDecision {
        if let Some(until) = self.blocked_until_ms {
            if now_ms < until {
                return RateLimitDecision::blocked(until);
            }
            // An elapsed lock also ends the window it was imposed in.
            *self = Self::fresh(now_ms);
        }

        if now_ms - self.window_started_ms >= policy.window_millis() {
            self.count = 0;
            self.window_started_ms = now_ms;
        }

        self.count = self.count.saturating_add(1);
        if self.count <= policy.limit {
            return RateLimitDecision::allowed(policy.limit - self.count);
        }

        let until = now_ms.saturating_add(policy.penalty_millis());
        self.blocked_until_ms = Some(until);
        RateLimitDecision::blocked(until)
    }

    /// Instant after which this record has no effect on any decision.
    pub fn reclaimable_at(&self, policy: &RateLimitPolicy) -> EpochMillis {
        let window_end = self
            .window_started_ms
            .saturating_add(policy.window_millis());
        self.blocked_until_ms.map_or(window_end, |until| until.max(window_end))
    }
}
