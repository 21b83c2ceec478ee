//! Periodic deletion of expired refresh sessions and visitor records.
//!
//! Records are kept `retention_days` past their expiry so rotated sessions
//! still catch replays for a while after they lapse.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use warden_core::clock::Clock;
use warden_core::session::SessionStore;
use warden_core::visitor::VisitorStore;

/// How often the retention job runs.
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

pub struct RetentionJob {
    pub sessions: Arc<dyn SessionStore>,
    pub visitors: Arc<dyn VisitorStore>,
    pub clock: Arc<dyn Clock>,
    pub retention_days: i64,
}

impl RetentionJob {
    /// Run the retention loop until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            retention_days = self.retention_days,
            interval_secs = RETENTION_INTERVAL.as_secs(),
            "Retention job started"
        );

        let mut interval = tokio::time::interval(RETENTION_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Retention job stopping");
                    break;
                }
                _ = interval.tick() => self.run_once().await,
            }
        }
    }

    /// One retention pass over both stores.
    pub async fn run_once(&self) {
        let cutoff = self.clock.now() - chrono::Duration::days(self.retention_days);

        match self.sessions.delete_expired_before(cutoff).await {
            Ok(0) => tracing::debug!("Retention: no sessions to purge"),
            Ok(deleted) => tracing::info!(deleted, "Retention: purged expired sessions"),
            Err(e) => tracing::error!(error = %e, "Retention: session cleanup failed"),
        }

        match self.visitors.delete_expired_before(cutoff).await {
            Ok(0) => tracing::debug!("Retention: no visitor records to purge"),
            Ok(deleted) => tracing::info!(deleted, "Retention: purged expired visitor records"),
            Err(e) => tracing::error!(error = %e, "Retention: visitor cleanup failed"),
        }
    }
}
