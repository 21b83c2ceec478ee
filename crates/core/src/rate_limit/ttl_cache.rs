//! Rate limiting over a key-value cache with per-key expiry.
//!
//! Two keys per identity: a block flag living for `penalty_secs` and a counter
//! living for `window_secs`. The check is several round trips rather than one
//! transaction, so under concurrency a few requests can observe the same count
//! and overshoot the limit by at most (concurrency - 1) before the block flag
//! lands. Backend errors fail open.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{FailureMode, RateLimitDecision, RateLimitPolicy, RateLimitStore};
use crate::clock::Clock;
use crate::error::StoreError;
use crate::types::EpochMillis;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Unexpected cache reply: {0}")]
    Protocol(String),
}

/// The cache primitives the limiter is built from.
#[async_trait]
pub trait TtlCache: Send + Sync {
    /// Remaining lifetime of `key` in milliseconds, `None` when the key is
    /// missing or has no expiry.
    async fn pttl(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Increment the integer at `key`, creating it at 0 first. Keeps any TTL.
    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// Set `key` to `value` with a TTL only if it does not exist. Returns
    /// whether the key was created.
    async fn set_nx_ex(&self, key: &str, secs: u64, value: &str) -> Result<bool, CacheError>;

    /// Set `key` to `value` with a TTL.
    async fn setex(&self, key: &str, secs: u64, value: &str) -> Result<(), CacheError>;
}

pub struct TtlCacheRateLimitStore<C> {
    cache: C,
    prefix: String,
}

impl<C: TtlCache> TtlCacheRateLimitStore<C> {
    pub fn new(cache: C) -> Self {
        Self::with_prefix(cache, "rl")
    }

    pub fn with_prefix(cache: C, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
        }
    }

    fn block_key(&self, key: &str) -> String {
        format!("{}:block:{key}", self.prefix)
    }

    fn count_key(&self, key: &str) -> String {
        format!("{}:count:{key}", self.prefix)
    }

    async fn try_check(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: EpochMillis,
    ) -> Result<RateLimitDecision, CacheError> {
        let block_key = self.block_key(key);
        if let Some(ttl_ms) = self.cache.pttl(&block_key).await? {
            if ttl_ms > 0 {
                return Ok(RateLimitDecision::blocked(now_ms + ttl_ms));
            }
        }

        // The counter is created with its expiry so no failure can leave it
        // without one.
        let count_key = self.count_key(key);
        self.cache
            .set_nx_ex(&count_key, policy.window_secs, "0")
            .await?;
        let count = self.cache.incr(&count_key).await?;

        if count <= i64::from(policy.limit) {
            let remaining = i64::from(policy.limit) - count;
            return Ok(RateLimitDecision::allowed(remaining as u32));
        }

        self.cache
            .setex(&block_key, policy.penalty_secs, "1")
            .await?;
        // The window the lock was imposed in ends with it.
        self.cache
            .setex(&count_key, policy.window_secs, "0")
            .await?;
        Ok(RateLimitDecision::blocked(
            now_ms.saturating_add(policy.penalty_millis()),
        ))
    }
}

#[async_trait]
impl<C: TtlCache> RateLimitStore for TtlCacheRateLimitStore<C> {
    async fn check_and_record(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: EpochMillis,
    ) -> Result<RateLimitDecision, StoreError> {
        match self.try_check(key, policy, now_ms).await {
            Ok(decision) => Ok(decision),
            Err(e) => {
                tracing::warn!(key, error = %e, "Rate limit cache unavailable, failing open");
                Ok(RateLimitDecision::allowed(policy.limit))
            }
        }
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::FailOpen
    }

    fn backend_name(&self) -> &'static str {
        "ttl-cache"
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at_ms: Option<EpochMillis>,
}

/// In-process [`TtlCache`] whose expiry follows the shared [`Clock`].
#[derive(Debug)]
pub struct MemoryTtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTtlCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, CacheEntry>,
        key: &str,
        now_ms: EpochMillis,
    ) -> Option<&'a mut CacheEntry> {
        let expired = entries
            .get(key)
            .and_then(|e| e.expires_at_ms)
            .is_some_and(|at| at <= now_ms);
        if expired {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

fn expiry(now_ms: EpochMillis, secs: u64) -> EpochMillis {
    now_ms.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX / 1000).saturating_mul(1000))
}

#[async_trait]
impl TtlCache for MemoryTtlCache {
    async fn pttl(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let now_ms = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        Ok(Self::live(&mut entries, key, now_ms)
            .and_then(|e| e.expires_at_ms)
            .map(|at| at - now_ms))
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let now_ms = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key, now_ms) {
            Some(entry) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    CacheError::Protocol(format!("value at '{key}' is not an integer"))
                })?;
                let next = current + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value: "1".into(),
                        expires_at_ms: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn set_nx_ex(&self, key: &str, secs: u64, value: &str) -> Result<bool, CacheError> {
        let now_ms = self.clock.now_millis();
        let mut entries = self.entries.lock().await;
        if Self::live(&mut entries, key, now_ms).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at_ms: Some(expiry(now_ms, secs)),
            },
        );
        Ok(true)
    }

    async fn setex(&self, key: &str, secs: u64, value: &str) -> Result<(), CacheError> {
        let now_ms = self.clock.now_millis();
        self.entries.lock().await.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at_ms: Some(expiry(now_ms, secs)),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const POLICY: RateLimitPolicy = RateLimitPolicy::new(3, 60, 120);

    struct DownCache;

    #[async_trait]
    impl TtlCache for DownCache {
        async fn pttl(&self, _key: &str) -> Result<Option<i64>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn incr(&self, _key: &str) -> Result<i64, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set_nx_ex(
            &self,
            _key: &str,
            _secs: u64,
            _value: &str,
        ) -> Result<bool, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn setex(&self, _key: &str, _secs: u64, _value: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    fn store_at_zero() -> (Arc<ManualClock>, TtlCacheRateLimitStore<MemoryTtlCache>) {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryTtlCache::new(clock.clone());
        (clock, TtlCacheRateLimitStore::new(cache))
    }

    #[tokio::test]
    async fn behaves_like_the_transactional_backend() {
        let (clock, store) = store_at_zero();

        for expected in [2, 1, 0] {
            let d = store.check_and_record("login:v1", &POLICY, 0).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected);
        }

        let blocked = store.check_and_record("login:v1", &POLICY, 0).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.blocked_until_ms, Some(120_000));

        clock.set_millis(120_000 - 1);
        let still = store
            .check_and_record("login:v1", &POLICY, clock.now_millis())
            .await
            .unwrap();
        assert!(!still.allowed);
        assert_eq!(still.blocked_until_ms, Some(120_000));

        clock.set_millis(120_000 + 1);
        let fresh = store
            .check_and_record("login:v1", &POLICY, clock.now_millis())
            .await
            .unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test]
    async fn counter_expires_with_window() {
        let (clock, store) = store_at_zero();
        store.check_and_record("k", &POLICY, 0).await.unwrap();
        store.check_and_record("k", &POLICY, 0).await.unwrap();

        clock.set_millis(60_000);
        let d = store.check_and_record("k", &POLICY, 60_000).await.unwrap();
        assert_eq!(d.remaining, 2);
    }

    #[tokio::test]
    async fn fails_open_when_cache_is_down() {
        let store = TtlCacheRateLimitStore::new(DownCache);
        let d = store.check_and_record("k", &POLICY, 0).await.unwrap();
        assert!(d.allowed);
        assert_eq!(store.failure_mode(), FailureMode::FailOpen);
    }

    /// Fails every `incr` while delegating everything else.
    struct IncrFails(MemoryTtlCache);

    #[async_trait]
    impl TtlCache for IncrFails {
        async fn pttl(&self, key: &str) -> Result<Option<i64>, CacheError> {
            self.0.pttl(key).await
        }
        async fn incr(&self, _key: &str) -> Result<i64, CacheError> {
            Err(CacheError::Backend("connection reset".into()))
        }
        async fn set_nx_ex(&self, key: &str, secs: u64, value: &str) -> Result<bool, CacheError> {
            self.0.set_nx_ex(key, secs, value).await
        }
        async fn setex(&self, key: &str, secs: u64, value: &str) -> Result<(), CacheError> {
            self.0.setex(key, secs, value).await
        }
    }

    #[tokio::test]
    async fn counter_key_carries_expiry_when_a_later_step_fails() {
        let clock = Arc::new(ManualClock::new(0));
        let store = TtlCacheRateLimitStore::new(IncrFails(MemoryTtlCache::new(clock.clone())));

        let d = store.check_and_record("k", &POLICY, 0).await.unwrap();
        assert!(d.allowed);

        let count_key = store.count_key("k");
        assert_eq!(store.cache.pttl(&count_key).await.unwrap(), Some(60_000));
    }

    #[tokio::test]
    async fn memory_cache_primitives() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryTtlCache::new(clock.clone());

        assert_eq!(cache.pttl("missing").await.unwrap(), None);
        assert_eq!(cache.incr("n").await.unwrap(), 1);
        assert_eq!(cache.pttl("n").await.unwrap(), None);

        assert!(cache.set_nx_ex("w", 10, "0").await.unwrap());
        assert!(!cache.set_nx_ex("w", 99, "0").await.unwrap());
        assert_eq!(cache.pttl("w").await.unwrap(), Some(10_000));
        assert_eq!(cache.incr("w").await.unwrap(), 1);
        assert_eq!(cache.pttl("w").await.unwrap(), Some(10_000));

        clock.set_millis(10_000);
        assert_eq!(cache.pttl("w").await.unwrap(), None);
        assert!(cache.set_nx_ex("w", 10, "0").await.unwrap());

        cache.setex("flag", 5, "x").await.unwrap();
        assert!(matches!(cache.incr("flag").await, Err(CacheError::Protocol(_))));
    }
}
