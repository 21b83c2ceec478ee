//! Single-process transactional backend.
//!
//! The whole read-modify-write runs under one lock, giving the same per-key
//! serializability as the database backend. Suitable for single-instance
//! deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{FailureMode, RateLimitCounter, RateLimitDecision, RateLimitPolicy, RateLimitStore};
use crate::error::StoreError;
use crate::types::EpochMillis;

#[derive(Debug, Clone, Copy)]
struct Entry {
    counter: RateLimitCounter,
    reclaimable_at: EpochMillis,
}

#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    counters: Mutex<HashMap<String, Entry>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a counter, for inspection.
    pub async fn counter(&self, key: &str) -> Option<RateLimitCounter> {
        self.counters.lock().await.get(key).map(|e| e.counter)
    }

    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.counters.lock().await.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn check_and_record(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: EpochMillis,
    ) -> Result<RateLimitDecision, StoreError> {
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(key.to_string()).or_insert_with(|| Entry {
            counter: RateLimitCounter::fresh(now_ms),
            reclaimable_at: now_ms,
        });
        let decision = entry.counter.record(policy, now_ms);
        entry.reclaimable_at = entry.counter.reclaimable_at(policy);
        Ok(decision)
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::FailClosed
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn reap_expired(&self, now_ms: EpochMillis) -> Result<u64, StoreError> {
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, entry| entry.reclaimable_at > now_ms);
        Ok((before - counters.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const POLICY: RateLimitPolicy = RateLimitPolicy::new(3, 60, 120);

    #[tokio::test]
    async fn fixed_window_with_penalty() {
        let store = MemoryRateLimitStore::new();

        for expected in [2, 1, 0] {
            let d = store.check_and_record("login:v1", &POLICY, 0).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected);
        }

        let blocked = store.check_and_record("login:v1", &POLICY, 0).await.unwrap();
        assert!(!blocked.allowed);
        assert!(blocked.blocked_until_ms.unwrap() > 0);

        let still = store
            .check_and_record("login:v1", &POLICY, 120_000 - 1)
            .await
            .unwrap();
        assert!(!still.allowed);

        let fresh = store
            .check_and_record("login:v1", &POLICY, 120_000 + 1)
            .await
            .unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryRateLimitStore::new();
        for _ in 0..4 {
            store.check_and_record("a", &POLICY, 0).await.unwrap();
        }
        let other = store.check_and_record("b", &POLICY, 0).await.unwrap();
        assert!(other.allowed);
        assert_eq!(other.remaining, 2);
    }

    #[tokio::test]
    async fn concurrent_checks_never_overshoot() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let policy = RateLimitPolicy::new(5, 60, 60);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.check_and_record("hot", &policy, 0).await })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
        assert_eq!(store.counter("hot").await.unwrap().count, 6);
    }

    #[tokio::test]
    async fn reaps_only_reclaimable_counters() {
        let store = MemoryRateLimitStore::new();
        store.check_and_record("idle", &POLICY, 0).await.unwrap();
        for _ in 0..4 {
            store.check_and_record("locked", &POLICY, 0).await.unwrap();
        }

        assert_eq!(store.reap_expired(60_000).await.unwrap(), 1);
        assert!(store.counter("idle").await.is_none());
        assert!(store.counter("locked").await.is_some());

        assert_eq!(store.reap_expired(120_000).await.unwrap(), 1);
        assert!(store.is_empty().await);
    }
}
