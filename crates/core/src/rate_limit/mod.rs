//! Fixed-window rate limiting with a penalty lockout.
//!
//! A single contract, [`RateLimitStore::check_and_record`], with interchangeable
//! backends:
//!
//! - transactional backends ([`MemoryRateLimitStore`], and the PostgreSQL
//!   store in `warden-db`) serialize the read-modify-write per key and
//!   propagate backend errors ([`FailureMode::FailClosed`]);
//! - [`TtlCacheRateLimitStore`] composes per-key TTL primitives of a cache
//!   service and fails open on backend errors ([`FailureMode::FailOpen`]).
//!
//! Callers must not assume uniform fail-safety across backends; the mode is
//! reported by [`RateLimitStore::failure_mode`] and logged at startup.

pub mod memory;
pub mod ttl_cache;
pub mod window;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::EpochMillis;

pub use memory::MemoryRateLimitStore;
pub use ttl_cache::{CacheError, MemoryTtlCache, TtlCache, TtlCacheRateLimitStore};
pub use window::RateLimitCounter;

/// Limits applied to one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Lockout imposed once the limit is exceeded, in seconds.
    pub penalty_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(limit: u32, window_secs: u64, penalty_secs: u64) -> Self {
        Self {
            limit,
            window_secs,
            penalty_secs,
        }
    }

    /// Every field must be positive: a zero window or penalty would expire
    /// counters and locks the moment they are written.
    pub fn validate(&self) -> Result<(), String> {
        if self.limit == 0 {
            return Err("limit must be positive".into());
        }
        if self.window_secs == 0 {
            return Err("window must be positive".into());
        }
        if self.penalty_secs == 0 {
            return Err("penalty must be positive".into());
        }
        Ok(())
    }

    pub fn window_millis(&self) -> EpochMillis {
        secs_to_millis(self.window_secs)
    }

    pub fn penalty_millis(&self) -> EpochMillis {
        secs_to_millis(self.penalty_secs)
    }
}

fn secs_to_millis(secs: u64) -> EpochMillis {
    i64::try_from(secs)
        .unwrap_or(i64::MAX / 1000)
        .saturating_mul(1000)
}

/// Outcome of a single check-and-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub blocked_until_ms: Option<EpochMillis>,
}

impl RateLimitDecision {
    pub fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            blocked_until_ms: None,
        }
    }

    pub fn blocked(until_ms: EpochMillis) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            blocked_until_ms: Some(until_ms),
        }
    }

    /// Whole seconds a client should wait before retrying, rounded up.
    pub fn retry_after_secs(&self, now_ms: EpochMillis) -> u64 {
        match self.blocked_until_ms {
            Some(until) if until > now_ms => {
                let millis = (until - now_ms) as u64;
                millis.div_ceil(1000)
            }
            _ => 0,
        }
    }
}

/// What a backend does when it cannot reach its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The error propagates and the request is rejected.
    FailClosed,
    /// The request is allowed and the error is logged.
    FailOpen,
}

impl FailureMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailClosed => "fail-closed",
            Self::FailOpen => "fail-open",
        }
    }
}

/// Atomic check-and-record over a keyed counter.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Apply the fixed-window-with-penalty algorithm to `key` at `now_ms`.
    async fn check_and_record(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: EpochMillis,
    ) -> Result<RateLimitDecision, StoreError>;

    fn failure_mode(&self) -> FailureMode;

    /// Short backend label for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Delete counters that no longer influence any decision at `now_ms`.
    ///
    /// Backends with native expiry have nothing to reap.
    async fn reap_expired(&self, _now_ms: EpochMillis) -> Result<u64, StoreError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_with_zero_fields_are_invalid() {
        assert!(RateLimitPolicy::new(5, 300, 900).validate().is_ok());
        assert!(RateLimitPolicy::new(0, 300, 900).validate().is_err());
        assert!(RateLimitPolicy::new(5, 0, 900).validate().is_err());
        assert!(RateLimitPolicy::new(5, 300, 0).validate().is_err());
    }

    #[test]
    fn retry_after_rounds_up() {
        let decision = RateLimitDecision::blocked(10_001);
        assert_eq!(decision.retry_after_secs(0), 11);
        assert_eq!(decision.retry_after_secs(10_000), 1);
        assert_eq!(decision.retry_after_secs(10_001), 0);
        assert_eq!(RateLimitDecision::allowed(3).retry_after_secs(0), 0);
    }

    #[test]
    fn policy_converts_to_millis() {
        let policy = RateLimitPolicy::new(3, 60, 120);
        assert_eq!(policy.window_millis(), 60_000);
        assert_eq!(policy.penalty_millis(), 120_000);
    }
}
