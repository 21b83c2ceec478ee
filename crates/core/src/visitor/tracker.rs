//! Best-effort visitor session tracking.
//!
//! Failures here are logged and swallowed: telemetry must never fail the
//! request it observes.

use std::sync::Arc;

use chrono::Duration;

use super::{is_valid_visitor_id, VisitPolicy, VisitorStore, VisitorTelemetry};
use crate::clock::Clock;

pub struct VisitorSessionTracker {
    store: Arc<dyn VisitorStore>,
    clock: Arc<dyn Clock>,
    policy: VisitPolicy,
}

impl VisitorSessionTracker {
    pub fn new(store: Arc<dyn VisitorStore>, clock: Arc<dyn Clock>, policy: VisitPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Record a request with the configured session timeout.
    pub async fn upsert(&self, telemetry: &VisitorTelemetry) -> Option<String> {
        self.upsert_with_timeout(telemetry, self.policy.session_timeout)
            .await
    }

    /// Record a request and return the visitor's current session id, for log
    /// correlation only. Returns `None` when the visit could not be recorded.
    pub async fn upsert_with_timeout(
        &self,
        telemetry: &VisitorTelemetry,
        session_timeout: Duration,
    ) -> Option<String> {
        if !is_valid_visitor_id(&telemetry.visitor_id) {
            tracing::debug!("Skipping visitor tracking for malformed visitor id");
            return None;
        }

        let policy = VisitPolicy {
            session_timeout,
            ..self.policy
        };
        let now = self.clock.now();

        match self.store.record_visit(telemetry, now, &policy).await {
            Ok(outcome) => {
                tracing::debug!(
                    visitor_session_id = %outcome.session_id,
                    path = ?outcome.path,
                    "Visitor session recorded"
                );
                Some(outcome.session_id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Visitor session tracking failed");
                None
            }
        }
    }
}
