//! Rows from the `visitor_pointers` and `visitor_sessions` tables.

use sqlx::FromRow;
use warden_core::types::Timestamp;
use warden_core::visitor::{VisitorPointer, VisitorSession};

#[derive(Debug, Clone, FromRow)]
pub struct PointerRow {
    pub visitor_id: String,
    pub current_session_id: Option<String>,
    pub last_seen_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_write_at: Timestamp,
}

impl From<PointerRow> for VisitorPointer {
    fn from(row: PointerRow) -> Self {
        Self {
            visitor_id: row.visitor_id,
            current_session_id: row.current_session_id,
            last_seen_at: row.last_seen_at,
            expires_at: row.expires_at,
            last_write_at: row.last_write_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct VisitorSessionRow {
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

impl From<VisitorSessionRow> for VisitorSession {
    fn from(row: VisitorSessionRow) -> Self {
        Self {
            session_id: row.session_id,
            visitor_id: row.visitor_id,
            started_at: row.started_at,
            last_seen_at: row.last_seen_at,
            expires_at: row.expires_at,
            request_count: row.request_count,
            ip_hash: row.ip_hash,
            ua_hash: row.ua_hash,
            ua_bucket: row.ua_bucket,
            referrer_bucket: row.referrer_bucket,
        }
    }
}
