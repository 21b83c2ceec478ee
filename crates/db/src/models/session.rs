//! Session row from the `sessions` table.

use sqlx::FromRow;
use warden_core::session::Session;
use warden_core::types::{DbId, Timestamp};

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: DbId,
    pub refresh_token_hash: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub rotated_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub replaced_by: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            session_id: row.session_id,
            user_id: row.user_id,
            refresh_token_hash: row.refresh_token_hash,
            created_at: row.created_at,
            expires_at: row.expires_at,
            rotated_at: row.rotated_at,
            revoked_at: row.revoked_at,
            replaced_by: row.replaced_by,
            ip: row.ip,
            user_agent: row.user_agent,
        }
    }
}
