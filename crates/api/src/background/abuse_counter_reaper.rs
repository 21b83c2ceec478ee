//! Periodic deletion of rate-limit counters that no longer affect decisions.
//!
//! Only transactional backends keep such counters around; TTL-cache backends
//! expire them natively and report nothing to reap.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use warden_core::clock::Clock;
use warden_core::rate_limit::RateLimitStore;

/// Run the reaper loop until `cancel` is triggered.
pub async fn run(
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        backend = store.backend_name(),
        interval_secs = interval.as_secs(),
        "Abuse counter reaper started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Abuse counter reaper stopping");
                break;
            }
            _ = ticker.tick() => reap_once(store.as_ref(), clock.as_ref()).await,
        }
    }
}

/// One reaping pass. Errors are logged; the next tick retries.
pub async fn reap_once(store: &dyn RateLimitStore, clock: &dyn Clock) {
    match store.reap_expired(clock.now_millis()).await {
        Ok(0) => tracing::debug!("Abuse counter reaper: nothing to reap"),
        Ok(reaped) => tracing::info!(reaped, "Abuse counter reaper: removed stale counters"),
        Err(e) => tracing::error!(error = %e, "Abuse counter reaper: pass failed"),
    }
}
