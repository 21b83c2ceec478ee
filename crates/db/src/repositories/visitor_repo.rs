//! Repository for the `visitor_pointers` and `visitor_sessions` tables.

use sqlx::{PgConnection, PgPool};
use warden_core::types::Timestamp;
use warden_core::visitor::{VisitorPointer, VisitorSession};

use crate::models::visitor::{PointerRow, VisitorSessionRow};

const POINTER_COLUMNS: &str =
    "visitor_id, current_session_id, last_seen_at, expires_at, last_write_at";

const SESSION_COLUMNS: &str = "session_id, visitor_id, started_at, last_seen_at, expires_at, \
                               request_count, ip_hash, ua_hash, ua_bucket, referrer_bucket";

pub struct VisitorRepo;

impl VisitorRepo {
    /// Insert an empty pointer for a first-time visitor so there is a row to
    /// lock. It carries no session until the visit is recorded.
    pub async fn ensure_pointer(
        conn: &mut PgConnection,
        visitor_id: &str,
        now: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO visitor_pointers
                (visitor_id, current_session_id, last_seen_at, expires_at, last_write_at)
             VALUES ($1, NULL, $2, $2, $2)
             ON CONFLICT (visitor_id) DO NOTHING",
        )
        .bind(visitor_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn lock_pointer(
        conn: &mut PgConnection,
        visitor_id: &str,
    ) -> Result<PointerRow, sqlx::Error> {
        let query =
            format!("SELECT {POINTER_COLUMNS} FROM visitor_pointers WHERE visitor_id = $1 FOR UPDATE");
        sqlx::query_as::<_, PointerRow>(&query)
            .bind(visitor_id)
            .fetch_one(conn)
            .await
    }

    pub async fn save_pointer(
        conn: &mut PgConnection,
        pointer: &VisitorPointer,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE visitor_pointers
             SET current_session_id = $2, last_seen_at = $3, expires_at = $4, last_write_at = $5
             WHERE visitor_id = $1",
        )
        .bind(&pointer.visitor_id)
        .bind(&pointer.current_session_id)
        .bind(pointer.last_seen_at)
        .bind(pointer.expires_at)
        .bind(pointer.last_write_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_session(
        conn: &mut PgConnection,
        session_id: &str,
    ) -> Result<Option<VisitorSessionRow>, sqlx::Error> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM visitor_sessions WHERE session_id = $1");
        sqlx::query_as::<_, VisitorSessionRow>(&query)
            .bind(session_id)
            .fetch_optional(conn)
            .await
    }

    /// Insert a new session or write the extended fields of an existing one.
    pub async fn upsert_session(
        conn: &mut PgConnection,
        session: &VisitorSession,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO visitor_sessions
                (session_id, visitor_id, started_at, last_seen_at, expires_at,
                 request_count, ip_hash, ua_hash, ua_bucket, referrer_bucket)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (session_id) DO UPDATE
             SET last_seen_at = EXCLUDED.last_seen_at,
                 expires_at = EXCLUDED.expires_at,
                 request_count = EXCLUDED.request_count",
        )
        .bind(&session.session_id)
        .bind(&session.visitor_id)
        .bind(session.started_at)
        .bind(session.last_seen_at)
        .bind(session.expires_at)
        .bind(session.request_count)
        .bind(&session.ip_hash)
        .bind(&session.ua_hash)
        .bind(&session.ua_bucket)
        .bind(&session.referrer_bucket)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn list_sessions_for(
        pool: &PgPool,
        visitor_id: &str,
    ) -> Result<Vec<VisitorSessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM visitor_sessions
             WHERE visitor_id = $1 ORDER BY started_at"
        );
        sqlx::query_as::<_, VisitorSessionRow>(&query)
            .bind(visitor_id)
            .fetch_all(pool)
            .await
    }

    /// Delete pointers and sessions that expired before `cutoff`.
    pub async fn delete_expired_before(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let sessions = sqlx::query("DELETE FROM visitor_sessions WHERE expires_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        let pointers = sqlx::query("DELETE FROM visitor_pointers WHERE expires_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(sessions.rows_affected() + pointers.rows_affected())
    }
}
