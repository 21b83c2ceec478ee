//! Refresh-token sessions and the rotation state machine.
//!
//! ```text
//! ACTIVE --refresh--> ROTATED (replaced_by set; presenting its token again is theft)
//!   |                    |
//!   +----revoke----------+--> REVOKED (terminal)
//! ```
//!
//! Sessions are never deleted by the service itself; rotated and revoked
//! records are kept so a replayed token can still be recognised.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hashing::derive_session_id;
use crate::types::{DbId, Timestamp};

pub use memory::MemorySessionStore;

/// Upper bound on revocations written per batch.
pub const REVOKE_BATCH_SIZE: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Derived from `refresh_token_hash`, see [`derive_session_id`].
    pub session_id: String,
    pub user_id: DbId,
    pub refresh_token_hash: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub rotated_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    /// Id of the session created when this one was rotated.
    pub replaced_by: Option<String>,
    /// Hashed client IP.
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    /// Build a fresh `ACTIVE` session for a refresh-token hash.
    pub fn issue(
        user_id: DbId,
        refresh_token_hash: String,
        ip: Option<String>,
        user_agent: Option<String>,
        now: Timestamp,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            session_id: derive_session_id(&refresh_token_hash),
            user_id,
            refresh_token_hash,
            created_at: now,
            expires_at: now + ttl,
            rotated_at: None,
            revoked_at: None,
            replaced_by: None,
            ip,
            user_agent,
        }
    }

    pub fn state(&self, now: Timestamp) -> SessionState {
        if self.expires_at <= now {
            SessionState::Expired
        } else if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if self.replaced_by.is_some() {
            SessionState::Rotated
        } else {
            SessionState::Active
        }
    }

    /// Live sessions are the only ones a refresh may rotate.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.state(now) == SessionState::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Active,
    Rotated,
    Revoked,
    Expired,
}

/// Client-facing session failures, each with a stable wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session expired")]
    Expired,

    #[error("Session revoked")]
    Revoked,

    #[error("Refresh token reuse detected")]
    ReuseDetected,
}

impl SessionError {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "SESSION_NOT_FOUND",
            Self::Expired => "SESSION_EXPIRED",
            Self::Revoked => "SESSION_REVOKED",
            Self::ReuseDetected => "REFRESH_REUSE_DETECTED",
        }
    }
}

/// What presenting a refresh token for `session` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTransition {
    /// ACTIVE -> ROTATED with a new successor.
    Rotate,
    /// The token belongs to an already-rotated session: lock the user down.
    ReuseDetected { user_id: DbId },
    Reject(SessionError),
}

/// Classify a refresh attempt. Checks run in a fixed order: existence,
/// expiry, revocation, then rotation.
pub fn refresh_transition(session: Option<&Session>, now: Timestamp) -> RefreshTransition {
    let Some(session) = session else {
        return RefreshTransition::Reject(SessionError::NotFound);
    };
    if session.expires_at <= now {
        return RefreshTransition::Reject(SessionError::Expired);
    }
    if session.revoked_at.is_some() {
        return RefreshTransition::Reject(SessionError::Revoked);
    }
    if session.replaced_by.is_some() {
        return RefreshTransition::ReuseDetected {
            user_id: session.user_id,
        };
    }
    RefreshTransition::Rotate
}

/// Result of [`SessionStore::rotate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Successor inserted and the current session linked to it.
    Rotated,
    /// The current session was no longer live when re-read inside the
    /// transaction (a concurrent refresh or revoke won). Carries that record.
    Lost(Session),
    /// The current session disappeared.
    Missing,
}

/// Persistence for [`Session`] records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    async fn find(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// In one transaction: re-read `current_id`; if it is still live at `now`,
    /// insert `successor` and set `rotated_at = now`, `replaced_by =
    /// successor.session_id` on the current record.
    async fn rotate(
        &self,
        current_id: &str,
        successor: &Session,
        now: Timestamp,
    ) -> Result<RotateOutcome, StoreError>;

    /// Set `revoked_at = now` unless already set. Returns whether this call
    /// revoked it.
    async fn revoke(&self, session_id: &str, now: Timestamp) -> Result<bool, StoreError>;

    /// Revoke every unrevoked session of `user_id`, writing at most
    /// [`REVOKE_BATCH_SIZE`] records per batch. Returns the number revoked.
    async fn revoke_all_for_user(&self, user_id: DbId, now: Timestamp) -> Result<u64, StoreError>;

    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<Session>, StoreError>;

    /// Delete sessions that expired before `cutoff`.
    async fn delete_expired_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn session() -> Session {
        Session::issue(7, "hash".into(), None, None, t0(), Duration::days(7))
    }

    #[test]
    fn issue_derives_session_id_from_hash() {
        let s = session();
        assert_eq!(s.session_id, derive_session_id("hash"));
        assert_eq!(s.expires_at, t0() + Duration::days(7));
        assert_eq!(s.state(t0()), SessionState::Active);
    }

    #[test]
    fn transition_order() {
        let now = t0() + Duration::hours(1);
        assert_eq!(
            refresh_transition(None, now),
            RefreshTransition::Reject(SessionError::NotFound)
        );

        let live = session();
        assert_eq!(refresh_transition(Some(&live), now), RefreshTransition::Rotate);

        let mut rotated = session();
        rotated.replaced_by = Some("next".into());
        assert_eq!(
            refresh_transition(Some(&rotated), now),
            RefreshTransition::ReuseDetected { user_id: 7 }
        );

        let mut revoked = rotated.clone();
        revoked.revoked_at = Some(now);
        assert_eq!(
            refresh_transition(Some(&revoked), now),
            RefreshTransition::Reject(SessionError::Revoked)
        );

        assert_eq!(
            refresh_transition(Some(&revoked), t0() + Duration::days(8)),
            RefreshTransition::Reject(SessionError::Expired)
        );
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(SessionError::NotFound.code(), "SESSION_NOT_FOUND");
        assert_eq!(SessionError::Expired.code(), "SESSION_EXPIRED");
        assert_eq!(SessionError::Revoked.code(), "SESSION_REVOKED");
        assert_eq!(SessionError::ReuseDetected.code(), "REFRESH_REUSE_DETECTED");
    }
}
