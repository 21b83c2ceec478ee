//! Anonymous visitor sessions for telemetry.
//!
//! One [`VisitorPointer`] per visitor id points at that visitor's current
//! [`VisitorSession`]. Each request either starts a new session, is throttled
//! (no write), or touches the current one. Only hashed or bucketed client data
//! is ever persisted.

pub mod aggregate;
pub mod memory;
pub mod tracker;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::hashing::hash_identity;
use crate::types::Timestamp;

pub use aggregate::{AggregateDelta, CounterTotals, MemoryAggregateSink};
pub use memory::MemoryVisitorStore;
pub use tracker::VisitorSessionTracker;

/// Longest accepted visitor id.
const MAX_VISITOR_ID_LEN: usize = 128;

/// Longest referrer bucket kept.
const MAX_REFERRER_BUCKET_LEN: usize = 64;

/// Timing rules for visitor sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitPolicy {
    /// Idle time after which the next request starts a new session.
    pub session_timeout: Duration,
    /// Requests closer than this to the last write are not written.
    pub write_throttle: Duration,
    /// Hard cap on a single session's length.
    pub max_session_duration: Duration,
    /// How long a pointer is retained after its last write.
    pub pointer_ttl: Duration,
}

impl Default for VisitPolicy {
    fn default() -> Self {
        Self {
            session_timeout: Duration::minutes(30),
            write_throttle: Duration::milliseconds(7_000),
            max_session_duration: Duration::hours(24),
            pointer_ttl: Duration::days(30),
        }
    }
}

/// Privacy-safe summary of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorTelemetry {
    pub visitor_id: String,
    pub ip_hash: Option<String>,
    pub ua_hash: Option<String>,
    pub ua_bucket: String,
    pub referrer_bucket: String,
}

impl VisitorTelemetry {
    /// Build telemetry from raw request data, hashing or bucketing every
    /// client identifier on the way in.
    pub fn from_raw(
        visitor_id: impl Into<String>,
        raw_ip: Option<&str>,
        raw_user_agent: Option<&str>,
        referrer: Option<&str>,
        salt: &str,
    ) -> Self {
        Self {
            visitor_id: visitor_id.into(),
            ip_hash: raw_ip.map(|ip| hash_identity(ip, salt)),
            ua_hash: raw_user_agent.map(|ua| hash_identity(ua, salt)),
            ua_bucket: ua_bucket(raw_user_agent).to_string(),
            referrer_bucket: referrer_bucket(referrer),
        }
    }
}

/// Visitor ids are opaque client tokens: 1-128 chars of `[A-Za-z0-9_-]`.
pub fn is_valid_visitor_id(visitor_id: &str) -> bool {
    !visitor_id.is_empty()
        && visitor_id.len() <= MAX_VISITOR_ID_LEN
        && visitor_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Coarse device class for a user agent.
pub fn ua_bucket(user_agent: Option<&str>) -> &'static str {
    let Some(ua) = user_agent.filter(|ua| !ua.trim().is_empty()) else {
        return "unknown";
    };
    let ua = ua.to_ascii_lowercase();
    if ["bot", "crawler", "spider", "curl", "wget"]
        .iter()
        .any(|needle| ua.contains(needle))
    {
        "bot"
    } else if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
        "mobile"
    } else {
        "desktop"
    }
}

/// Referrer host, or `direct` when there is none.
pub fn referrer_bucket(referrer: Option<&str>) -> String {
    let Some(referrer) = referrer.map(str::trim).filter(|r| !r.is_empty()) else {
        return "direct".into();
    };
    let without_scheme = referrer
        .split_once("://")
        .map_or(referrer, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('@')
        .next()
        .unwrap_or_default();
    let host: String = host
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
        .take(MAX_REFERRER_BUCKET_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    if host.is_empty() {
        "direct".into()
    } else {
        host
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorPointer {
    pub visitor_id: String,
    pub current_session_id: Option<String>,
    pub last_seen_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_write_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorSession {
    pub session_id: String,
    pub visitor_id: String,
    pub started_at: Timestamp,
    pub last_seen_at: Timestamp,
    pub expires_at: Timestamp,
    pub request_count: i64,
    pub ip_hash: Option<String>,
    pub ua_hash: Option<String>,
    pub ua_bucket: String,
    pub referrer_bucket: String,
}

impl VisitorSession {
    fn start(telemetry: &VisitorTelemetry, now: Timestamp, policy: &VisitPolicy) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            visitor_id: telemetry.visitor_id.clone(),
            started_at: now,
            last_seen_at: now,
            expires_at: now + policy.session_timeout.min(policy.max_session_duration),
            request_count: 1,
            ip_hash: telemetry.ip_hash.clone(),
            ua_hash: telemetry.ua_hash.clone(),
            ua_bucket: telemetry.ua_bucket.clone(),
            referrer_bucket: telemetry.referrer_bucket.clone(),
        }
    }

    fn touch(&mut self, now: Timestamp, policy: &VisitPolicy) {
        self.request_count += 1;
        self.last_seen_at = now;
        self.expires_at =
            (now + policy.session_timeout).min(self.started_at + policy.max_session_duration);
    }

    pub fn is_live(&self, now: Timestamp, session_timeout: Duration) -> bool {
        now < self.expires_at && now - self.last_seen_at < session_timeout
    }
}

/// Which of the three upsert paths a request took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitPath {
    /// No live session existed; a new one was created.
    Started,
    /// Too soon after the last write; nothing was written.
    Throttled,
    /// The live session was extended.
    Touched,
}

/// Decide the path for a request given the pointer and the session it
/// currently points at.
pub fn plan_visit(
    pointer: Option<&VisitorPointer>,
    session: Option<&VisitorSession>,
    now: Timestamp,
    policy: &VisitPolicy,
) -> VisitPath {
    let (Some(pointer), Some(session)) = (pointer, session) else {
        return VisitPath::Started;
    };
    if !session.is_live(now, policy.session_timeout) {
        return VisitPath::Started;
    }
    if now - pointer.last_write_at < policy.write_throttle {
        return VisitPath::Throttled;
    }
    VisitPath::Touched
}

/// Everything a backend must persist for one request, computed up front so
/// all backends share the same rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitResolution {
    pub path: VisitPath,
    pub session_id: String,
    /// Records to write; both `None` on the throttled path.
    pub pointer: Option<VisitorPointer>,
    pub session: Option<VisitorSession>,
    pub delta: Option<AggregateDelta>,
}

pub fn resolve_visit(
    telemetry: &VisitorTelemetry,
    pointer: Option<VisitorPointer>,
    session: Option<VisitorSession>,
    now: Timestamp,
    policy: &VisitPolicy,
) -> VisitResolution {
    // A session that does not belong to the pointer is treated as absent.
    let session = session.filter(|s| {
        pointer
            .as_ref()
            .and_then(|p| p.current_session_id.as_deref())
            == Some(s.session_id.as_str())
    });
    let path = plan_visit(pointer.as_ref(), session.as_ref(), now, policy);
    let first_visit_today = pointer.as_ref().map_or(true, |p| {
        p.current_session_id.is_none() || p.last_seen_at.date_naive() != now.date_naive()
    });

    let (path, session) = match (path, session) {
        (VisitPath::Throttled, Some(current)) => {
            return VisitResolution {
                path,
                session_id: current.session_id,
                pointer: None,
                session: None,
                delta: None,
            };
        }
        (VisitPath::Touched, Some(mut current)) => {
            current.touch(now, policy);
            (VisitPath::Touched, current)
        }
        _ => (
            VisitPath::Started,
            VisitorSession::start(telemetry, now, policy),
        ),
    };

    let pointer = VisitorPointer {
        visitor_id: telemetry.visitor_id.clone(),
        current_session_id: Some(session.session_id.clone()),
        last_seen_at: now,
        expires_at: now + policy.pointer_ttl,
        last_write_at: now,
    };
    let delta = AggregateDelta::for_visit(telemetry, path, first_visit_today, now);

    VisitResolution {
        path,
        session_id: session.session_id.clone(),
        pointer: Some(pointer),
        session: Some(session),
        delta: Some(delta),
    }
}

/// Outcome returned by a [`VisitorStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitOutcome {
    pub session_id: String,
    pub path: VisitPath,
}

/// Persistence for visitor pointers, visitor sessions and the aggregate
/// counters written alongside them.
#[async_trait]
pub trait VisitorStore: Send + Sync {
    /// In one unit of work serialized on the visitor's pointer: read the
    /// pointer and its current session, apply [`resolve_visit`], and persist
    /// the pointer, the session and the aggregate increments together.
    async fn record_visit(
        &self,
        telemetry: &VisitorTelemetry,
        now: Timestamp,
        policy: &VisitPolicy,
    ) -> Result<VisitOutcome, StoreError>;

    /// Delete pointers and sessions whose expiry is before `cutoff`.
    async fn delete_expired_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}
