//! Daily and hourly traffic counters.
//!
//! Counters are only ever incremented, never read for decisions, so they
//! carry no consistency dependency on sessions or pointers beyond being
//! written in the same unit of work as the visit they count.

use std::collections::HashMap;

use chrono::{NaiveDate, Timelike};
use serde::Serialize;

use super::{VisitPath, VisitorTelemetry};
use crate::types::Timestamp;

/// Bucket dimension for user-agent classes.
pub const DIMENSION_UA: &str = "ua";
/// Bucket dimension for referrer hosts.
pub const DIMENSION_REFERRER: &str = "referrer";

/// Increments produced by one written visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateDelta {
    pub day: NaiveDate,
    pub hour: u32,
    pub requests: i64,
    pub sessions_started: i64,
    pub unique_visitors_approx: i64,
    pub ua_bucket: String,
    pub referrer_bucket: String,
}

impl AggregateDelta {
    pub fn for_visit(
        telemetry: &VisitorTelemetry,
        path: VisitPath,
        first_visit_today: bool,
        now: Timestamp,
    ) -> Self {
        let started = path == VisitPath::Started;
        Self {
            day: now.date_naive(),
            hour: now.hour(),
            requests: 1,
            sessions_started: i64::from(started),
            unique_visitors_approx: i64::from(started && first_visit_today),
            ua_bucket: telemetry.ua_bucket.clone(),
            referrer_bucket: telemetry.referrer_bucket.clone(),
        }
    }

    /// `(dimension, bucket)` pairs this delta increments by one.
    pub fn buckets(&self) -> [(&'static str, &str); 2] {
        [
            (DIMENSION_UA, self.ua_bucket.as_str()),
            (DIMENSION_REFERRER, self.referrer_bucket.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterTotals {
    pub requests: i64,
    pub sessions_started: i64,
    pub unique_visitors_approx: i64,
}

impl CounterTotals {
    fn add(&mut self, delta: &AggregateDelta) {
        self.requests += delta.requests;
        self.sessions_started += delta.sessions_started;
        self.unique_visitors_approx += delta.unique_visitors_approx;
    }
}

/// In-process counter sink, owned by [`super::MemoryVisitorStore`] and
/// updated under the same lock as the visit.
#[derive(Debug, Clone, Default)]
pub struct MemoryAggregateSink {
    daily: HashMap<NaiveDate, CounterTotals>,
    hourly: HashMap<(NaiveDate, u32), CounterTotals>,
    buckets: HashMap<(NaiveDate, &'static str, String), i64>,
}

impl MemoryAggregateSink {
    pub fn apply(&mut self, delta: &AggregateDelta) {
        self.daily.entry(delta.day).or_default().add(delta);
        self.hourly
            .entry((delta.day, delta.hour))
            .or_default()
            .add(delta);
        for (dimension, bucket) in delta.buckets() {
            *self
                .buckets
                .entry((delta.day, dimension, bucket.to_string()))
                .or_default() += 1;
        }
    }

    pub fn daily(&self, day: NaiveDate) -> CounterTotals {
        self.daily.get(&day).copied().unwrap_or_default()
    }

    pub fn hourly(&self, day: NaiveDate, hour: u32) -> CounterTotals {
        self.hourly.get(&(day, hour)).copied().unwrap_or_default()
    }

    pub fn bucket(&self, day: NaiveDate, dimension: &'static str, bucket: &str) -> i64 {
        self.buckets
            .get(&(day, dimension, bucket.to_string()))
            .copied()
            .unwrap_or_default()
    }
}
