//! Per-route, per-identity abuse control.
//!
//! [`AbuseGuard`] turns `{route, identity}` into a counter key and delegates
//! to whichever [`RateLimitStore`] the deployment selected.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::rate_limit::{FailureMode, RateLimitDecision, RateLimitPolicy, RateLimitStore};
use crate::types::EpochMillis;
use crate::visitor::is_valid_visitor_id;

/// Bucket shared by every caller that has neither a visitor id nor an IP.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Longest key persisted for a counter document.
const MAX_KEY_LEN: usize = 200;

/// Who is making a request, as far as rate limiting is concerned.
///
/// Holds only opaque values: the visitor id is client-generated and the IP is
/// already hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    pub visitor_id: Option<String>,
    pub ip_hash: Option<String>,
}

impl ClientIdentity {
    /// The identity the counter is keyed on: visitor id, else hashed IP, else
    /// the shared anonymous bucket.
    ///
    /// Only values that are already key-safe count. Anything else would be
    /// rewritten by [`sanitize_key`] and could share a counter with another
    /// identity.
    pub fn bucket(&self) -> &str {
        self.visitor_id
            .as_deref()
            .filter(|v| is_valid_visitor_id(v))
            .or_else(|| self.ip_hash.as_deref().filter(|v| is_valid_visitor_id(v)))
            .unwrap_or(ANONYMOUS_IDENTITY)
    }
}

/// Build the counter key `{route_key}:{identity}`.
pub fn build_key(route_key: &str, identity: &ClientIdentity) -> String {
    format!("{route_key}:{}", identity.bucket())
}

/// Make a key safe to use as a document id: anything outside
/// `[A-Za-z0-9:_.-]` becomes `_`, and the result is capped in length.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_KEY_LEN)
        .collect()
}

pub struct AbuseGuard {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl AbuseGuard {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.store.failure_mode()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Record one request for `identity` on `route_key` and report the decision.
    ///
    /// Store errors propagate only for fail-closed backends; fail-open
    /// backends have already converted them into an allow.
    pub async fn check(
        &self,
        route_key: &str,
        identity: &ClientIdentity,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, CoreError> {
        let now_ms = self.clock.now_millis();
        self.check_at(route_key, identity, policy, now_ms).await
    }

    /// Like [`check`](Self::check) but turns a rejection into
    /// [`CoreError::RateLimited`].
    pub async fn enforce(
        &self,
        route_key: &str,
        identity: &ClientIdentity,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, CoreError> {
        let now_ms = self.clock.now_millis();
        let decision = self.check_at(route_key, identity, policy, now_ms).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(CoreError::RateLimited {
                remaining: decision.remaining,
                blocked_until_ms: decision.blocked_until_ms,
                retry_after_secs: decision.retry_after_secs(now_ms),
            })
        }
    }

    async fn check_at(
        &self,
        route_key: &str,
        identity: &ClientIdentity,
        policy: &RateLimitPolicy,
        now_ms: EpochMillis,
    ) -> Result<RateLimitDecision, CoreError> {
        let key = sanitize_key(&build_key(route_key, identity));
        let decision = self.store.check_and_record(&key, policy, now_ms).await?;
        if !decision.allowed {
            tracing::warn!(
                key = %key,
                blocked_until_ms = ?decision.blocked_until_ms,
                "Rate limit exceeded"
            );
        }
        Ok(decision)
    }
}
