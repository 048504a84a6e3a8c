//! Pending email verification records.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::User;

#[derive(Debug, Clone, FromRow)]
pub struct VerifyEmail {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub secret_code: String,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl VerifyEmail {
    /// A record can be consumed once, before it expires, with its own code.
    pub fn accepts(&self, secret_code: &str, now: DateTime<Utc>) -> bool {
        !self.is_used && now < self.expired_at && self.secret_code == secret_code
    }
}

#[derive(Debug, Clone)]
pub struct CreateVerifyEmailParams {
    pub username: String,
    pub email: String,
    pub secret_code: String,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VerifyEmailTxResult {
    pub user: User,
    pub verify_email: VerifyEmail,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(is_used: bool, expires_in: Duration) -> VerifyEmail {
        let now = Utc::now();
        VerifyEmail {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            secret_code: "s3cr3t".into(),
            is_used,
            created_at: now,
            expired_at: now + expires_in,
        }
    }

    #[test]
    fn accepts_only_fresh_matching_code() {
        let now = Utc::now();
        assert!(record(false, Duration::minutes(5)).accepts("s3cr3t", now));
        assert!(!record(false, Duration::minutes(5)).accepts("wrong", now));
        assert!(!record(true, Duration::minutes(5)).accepts("s3cr3t", now));
        assert!(!record(false, Duration::minutes(-1)).accepts("s3cr3t", now));
    }
}
