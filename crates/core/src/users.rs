//! Credential lookup used by login. User management itself lives elsewhere.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::DbId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub id: DbId,
    pub username: String,
    /// PHC-formatted Argon2id hash.
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str)
        -> Result<Option<UserCredentials>, StoreError>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<UserCredentials>, StoreError>;
}

/// In-process [`UserDirectory`] keyed by username.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserCredentials>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: UserCredentials) {
        self.users.write().await.insert(user.username.clone(), user);
    }

    pub async fn set_active(&self, username: &str, is_active: bool) {
        if let Some(user) = self.users.write().await.get_mut(username) {
            user.is_active = is_active;
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        Ok(self.users.read().await.get(username).cloned())
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<UserCredentials>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.id == id)
            .cloned())
    }
}
