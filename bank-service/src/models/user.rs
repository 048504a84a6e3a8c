//! User model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::{Role, VerifyEmail};

/// User entity (internal, includes the password hash).
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub username: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
    pub is_email_verified: bool,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Sanitized user view for API responses.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserResponse {
    pub username: String,
    pub role: Role,
    pub full_name: String,
    pub email: String,
    pub is_email_verified: bool,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            username: u.username,
            role: u.role,
            full_name: u.full_name,
            email: u.email,
            is_email_verified: u.is_email_verified,
            password_changed_at: u.password_changed_at,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub username: String,
    pub role: Role,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
}

/// A new user together with the pending verification record that must be
/// stored with it.
#[derive(Debug, Clone)]
pub struct CreateUserTxParams {
    pub user: CreateUserParams,
    pub secret_code: String,
    pub verify_email_expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUserTxResult {
    pub user: User,
    pub verify_email: VerifyEmail,
}

/// Partial profile update. `None` leaves the column unchanged; a new
/// password hash must come with its `password_changed_at`.
#[derive(Debug, Clone, Default)]
pub struct UpdateUserParams {
    pub username: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
}
