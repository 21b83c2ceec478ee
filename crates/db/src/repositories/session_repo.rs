//! Repository for the `sessions` table.

use sqlx::{PgConnection, PgExecutor, PgPool};
use warden_core::session::Session;
use warden_core::types::{DbId, Timestamp};

use crate::models::session::SessionRow;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "session_id, user_id, refresh_token_hash, created_at, expires_at, \
                       rotated_at, revoked_at, replaced_by, ip, user_agent";

pub struct SessionRepo;

impl SessionRepo {
    /// Insert a session record as issued.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        session: &Session,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions
                (session_id, user_id, refresh_token_hash, created_at, expires_at,
                 rotated_at, revoked_at, replaced_by, ip, user_agent)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&session.session_id)
        .bind(session.user_id)
        .bind(&session.refresh_token_hash)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.rotated_at)
        .bind(session.revoked_at)
        .bind(&session.replaced_by)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find(pool: &PgPool, session_id: &str) -> Result<Option<SessionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sessions WHERE session_id = $1");
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(session_id)
            .fetch_optional(pool)
            .await
    }

    /// Read a session and hold its row lock until the transaction ends.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        session_id: &str,
    ) -> Result<Option<SessionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sessions WHERE session_id = $1 FOR UPDATE");
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(session_id)
            .fetch_optional(conn)
            .await
    }

    /// Link a session to its successor.
    pub async fn mark_rotated(
        conn: &mut PgConnection,
        session_id: &str,
        successor_id: &str,
        now: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET rotated_at = $2, replaced_by = $3 WHERE session_id = $1")
            .bind(session_id)
            .bind(now)
            .bind(successor_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Revoke a single session. Returns `true` if the row was updated.
    pub async fn revoke(pool: &PgPool, session_id: &str, now: Timestamp) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = $2 WHERE session_id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke up to `batch_size` unrevoked sessions of a user. Returns the
    /// number of rows written.
    pub async fn revoke_batch_for_user(
        pool: &PgPool,
        user_id: DbId,
        now: Timestamp,
        batch_size: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = $2
             WHERE revoked_at IS NULL
               AND session_id IN (
                 SELECT session_id FROM sessions
                 WHERE user_id = $1 AND revoked_at IS NULL
                 ORDER BY session_id
                 LIMIT $3
                 FOR UPDATE
             )",
        )
        .bind(user_id)
        .bind(now)
        .bind(batch_size)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All sessions of a user, newest first.
    pub async fn list_for_user(pool: &PgPool, user_id: DbId) -> Result<Vec<SessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sessions WHERE user_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Delete sessions that expired before `cutoff`. Returns the count deleted.
    pub async fn delete_expired_before(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
