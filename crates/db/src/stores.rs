//! PostgreSQL implementations of the `warden-core` store traits.
//!
//! Every read-modify-write runs in one transaction that first takes a row
//! lock (`SELECT ... FOR UPDATE`) on the record being decided, so concurrent
//! requests for the same key, session or visitor are serialized.

use async_trait::async_trait;
use warden_core::error::StoreError;
use warden_core::rate_limit::{
    FailureMode, RateLimitCounter, RateLimitDecision, RateLimitPolicy, RateLimitStore,
};
use warden_core::session::{RotateOutcome, Session, SessionStore, REVOKE_BATCH_SIZE};
use warden_core::types::{DbId, EpochMillis, Timestamp};
use warden_core::users::{UserCredentials, UserDirectory};
use warden_core::visitor::{
    resolve_visit, VisitOutcome, VisitPolicy, VisitorPointer, VisitorSession, VisitorStore,
    VisitorTelemetry,
};

use crate::repositories::{AggregateRepo, RateLimitRepo, SessionRepo, UserRepo, VisitorRepo};
use crate::{to_store_error, DbPool};

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: DbPool,
}

impl PgSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        SessionRepo::insert(&self.pool, session)
            .await
            .map_err(to_store_error)
    }

    async fn find(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let row = SessionRepo::find(&self.pool, session_id)
            .await
            .map_err(to_store_error)?;
        Ok(row.map(Session::from))
    }

    async fn rotate(
        &self,
        current_id: &str,
        successor: &Session,
        now: Timestamp,
    ) -> Result<RotateOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        let Some(row) = SessionRepo::find_for_update(&mut tx, current_id)
            .await
            .map_err(to_store_error)?
        else {
            return Ok(RotateOutcome::Missing);
        };
        let current = Session::from(row);
        if !current.is_live(now) {
            return Ok(RotateOutcome::Lost(current));
        }

        SessionRepo::insert(&mut *tx, successor)
            .await
            .map_err(to_store_error)?;
        SessionRepo::mark_rotated(&mut tx, current_id, &successor.session_id, now)
            .await
            .map_err(to_store_error)?;
        tx.commit().await.map_err(to_store_error)?;

        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, session_id: &str, now: Timestamp) -> Result<bool, StoreError> {
        SessionRepo::revoke(&self.pool, session_id, now)
            .await
            .map_err(to_store_error)
    }

    async fn revoke_all_for_user(&self, user_id: DbId, now: Timestamp) -> Result<u64, StoreError> {
        // Repeat until a batch finds nothing, which also picks up successors
        // committed by a rotation that raced an earlier batch.
        let mut revoked = 0;
        loop {
            let batch =
                SessionRepo::revoke_batch_for_user(&self.pool, user_id, now, REVOKE_BATCH_SIZE as i64)
                    .await
                    .map_err(to_store_error)?;
            if batch == 0 {
                break;
            }
            revoked += batch;
        }
        Ok(revoked)
    }

    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<Session>, StoreError> {
        let rows = SessionRepo::list_for_user(&self.pool, user_id)
            .await
            .map_err(to_store_error)?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn delete_expired_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        SessionRepo::delete_expired_before(&self.pool, cutoff)
            .await
            .map_err(to_store_error)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool)
            .await
            .map_err(to_store_error)
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Transactional counter backend. Errors propagate, so callers reject the
/// request when the database is unreachable.
#[derive(Debug, Clone)]
pub struct PgRateLimitStore {
    pool: DbPool,
}

impl PgRateLimitStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn check_and_record(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: EpochMillis,
    ) -> Result<RateLimitDecision, StoreError> {
        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        RateLimitRepo::ensure(&mut tx, key, now_ms)
            .await
            .map_err(to_store_error)?;
        let row = RateLimitRepo::lock(&mut tx, key)
            .await
            .map_err(to_store_error)?;

        let mut counter = RateLimitCounter::try_from(row)?;
        let before = counter;
        let decision = counter.record(policy, now_ms);

        // A request rejected under an active lock leaves the counter as is.
        if counter != before {
            RateLimitRepo::save(&mut tx, key, &counter, counter.reclaimable_at(policy))
                .await
                .map_err(to_store_error)?;
        }
        tx.commit().await.map_err(to_store_error)?;

        Ok(decision)
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::FailClosed
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn reap_expired(&self, now_ms: EpochMillis) -> Result<u64, StoreError> {
        RateLimitRepo::delete_reclaimable(&self.pool, now_ms)
            .await
            .map_err(to_store_error)
    }
}

// ---------------------------------------------------------------------------
// Visitor sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgVisitorStore {
    pool: DbPool,
}

impl PgVisitorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VisitorStore for PgVisitorStore {
    async fn record_visit(
        &self,
        telemetry: &VisitorTelemetry,
        now: Timestamp,
        policy: &VisitPolicy,
    ) -> Result<VisitOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        // The pointer row is the per-visitor lock; create it empty on a
        // first visit so concurrent first requests queue behind one another.
        VisitorRepo::ensure_pointer(&mut tx, &telemetry.visitor_id, now)
            .await
            .map_err(to_store_error)?;
        let pointer = VisitorPointer::from(
            VisitorRepo::lock_pointer(&mut tx, &telemetry.visitor_id)
                .await
                .map_err(to_store_error)?,
        );
        let session = match pointer.current_session_id.as_deref() {
            Some(id) => VisitorRepo::find_session(&mut tx, id)
                .await
                .map_err(to_store_error)?
                .map(VisitorSession::from),
            None => None,
        };

        let resolution = resolve_visit(telemetry, Some(pointer), session, now, policy);

        if let Some(session) = &resolution.session {
            VisitorRepo::upsert_session(&mut tx, session)
                .await
                .map_err(to_store_error)?;
        }
        if let Some(pointer) = &resolution.pointer {
            VisitorRepo::save_pointer(&mut tx, pointer)
                .await
                .map_err(to_store_error)?;
        }
        if let Some(delta) = &resolution.delta {
            AggregateRepo::apply(&mut tx, delta)
                .await
                .map_err(to_store_error)?;
        }
        tx.commit().await.map_err(to_store_error)?;

        Ok(VisitOutcome {
            session_id: resolution.session_id,
            path: resolution.path,
        })
    }

    async fn delete_expired_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        VisitorRepo::delete_expired_before(&self.pool, cutoff)
            .await
            .map_err(to_store_error)
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: DbPool,
}

impl PgUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let user = UserRepo::find_by_username(&self.pool, username)
            .await
            .map_err(to_store_error)?;
        Ok(user.map(UserCredentials::from))
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<UserCredentials>, StoreError> {
        let user = UserRepo::find_by_id(&self.pool, id)
            .await
            .map_err(to_store_error)?;
        Ok(user.map(UserCredentials::from))
    }
}
