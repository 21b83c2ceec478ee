use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{RotateOutcome, Session, SessionStore, REVOKE_BATCH_SIZE};
use crate::error::StoreError;
use crate::types::{DbId, Timestamp};

/// In-process [`SessionStore`]. Every operation runs under one lock, which
/// gives `rotate` the same all-or-nothing behaviour as a database transaction.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_for_user(&self, user_id: DbId) -> Vec<Session> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn rotate(
        &self,
        current_id: &str,
        successor: &Session,
        now: Timestamp,
    ) -> Result<RotateOutcome, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let Some(current) = sessions.get(current_id) else {
            return Ok(RotateOutcome::Missing);
        };
        if !current.is_live(now) {
            return Ok(RotateOutcome::Lost(current.clone()));
        }
        if sessions.contains_key(&successor.session_id) {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                successor.session_id
            )));
        }

        sessions.insert(successor.session_id.clone(), successor.clone());
        if let Some(current) = sessions.get_mut(current_id) {
            current.rotated_at = Some(now);
            current.replaced_by = Some(successor.session_id.clone());
        }
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, session_id: &str, now: Timestamp) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some(s) if s.revoked_at.is_none() => {
                s.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: DbId, now: Timestamp) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let ids: Vec<String> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.revoked_at.is_none())
            .map(|s| s.session_id.clone())
            .collect();

        let mut revoked = 0;
        for batch in ids.chunks(REVOKE_BATCH_SIZE) {
            for id in batch {
                if let Some(s) = sessions.get_mut(id) {
                    s.revoked_at = Some(now);
                    revoked += 1;
                }
            }
        }
        Ok(revoked)
    }

    async fn list_for_user(&self, user_id: DbId) -> Result<Vec<Session>, StoreError> {
        let mut list = self.all_for_user(user_id).await;
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn delete_expired_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= cutoff);
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::hashing::generate_refresh_token;

    fn issue(user_id: DbId, now: Timestamp) -> Session {
        let (_, hash) = generate_refresh_token();
        Session::issue(user_id, hash, None, None, now, Duration::days(7))
    }

    #[tokio::test]
    async fn rotate_links_old_to_new() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let old = issue(1, now);
        store.create(&old).await.unwrap();

        let new = issue(1, now);
        let outcome = store.rotate(&old.session_id, &new, now).await.unwrap();
        assert_eq!(outcome, RotateOutcome::Rotated);

        let old = store.find(&old.session_id).await.unwrap().unwrap();
        assert_eq!(old.replaced_by.as_deref(), Some(new.session_id.as_str()));
        assert_eq!(old.rotated_at, Some(now));
        assert!(store.find(&new.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_rotation_of_same_session_loses() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let old = issue(1, now);
        store.create(&old).await.unwrap();

        store.rotate(&old.session_id, &issue(1, now), now).await.unwrap();
        let second = store
            .rotate(&old.session_id, &issue(1, now), now)
            .await
            .unwrap();
        assert!(matches!(second, RotateOutcome::Lost(s) if s.replaced_by.is_some()));
        assert_eq!(store.all_for_user(1).await.len(), 2);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let s = issue(1, now);
        store.create(&s).await.unwrap();

        assert!(store.revoke(&s.session_id, now).await.unwrap());
        let later = now + Duration::minutes(5);
        assert!(!store.revoke(&s.session_id, later).await.unwrap());
        assert_eq!(
            store.find(&s.session_id).await.unwrap().unwrap().revoked_at,
            Some(now)
        );
        assert!(!store.revoke("missing", now).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_all_spans_multiple_batches() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        for _ in 0..(REVOKE_BATCH_SIZE + 25) {
            store.create(&issue(9, now)).await.unwrap();
        }
        store.create(&issue(10, now)).await.unwrap();

        let revoked = store.revoke_all_for_user(9, now).await.unwrap();
        assert_eq!(revoked, (REVOKE_BATCH_SIZE + 25) as u64);
        assert!(store
            .all_for_user(9)
            .await
            .iter()
            .all(|s| s.revoked_at.is_some()));
        assert!(store.all_for_user(10).await[0].revoked_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = MemorySessionStore::new();
        let s = issue(1, Utc::now());
        store.create(&s).await.unwrap();
        assert!(matches!(
            store.create(&s).await,
            Err(StoreError::Conflict(_))
        ));
    }
}
