//! Canonical time source.
//!
//! Every service reads the clock once per operation and threads that instant
//! through all of its steps, so TTL arithmetic never mixes two wall-clock reads.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

use crate::types::{EpochMillis, Timestamp};

/// Clock abstraction so expiry logic can be driven deterministically in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;

    fn now_millis(&self) -> EpochMillis {
        self.now().timestamp_millis()
    }
}

/// Wall clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually driven clock. Starts at the given epoch millisecond and only moves
/// when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: EpochMillis) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn starting_at(ts: Timestamp) -> Self {
        Self::new(ts.timestamp_millis())
    }

    pub fn set_millis(&self, millis: EpochMillis) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_default()
    }

    fn now_millis(&self) -> EpochMillis {
        self.millis.load(Ordering::SeqCst)
    }
}
