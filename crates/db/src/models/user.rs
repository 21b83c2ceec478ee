//! User model and DTOs.

use sqlx::FromRow;
use warden_core::types::{DbId, Timestamp};
use warden_core::users::UserCredentials;

/// A row from the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: DbId,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<User> for UserCredentials {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
            is_active: user.is_active,
        }
    }
}

/// DTO for creating a user.
pub struct CreateUser {
    pub username: String,
    pub password_hash: String,
    pub role: String,
}
