//! Delivery of email-verification notices.
//!
//! Delivery is fire-and-forget: the auth engine spawns the send and only
//! logs failures.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::info;

/// What a new user needs to confirm their address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationNotice {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub email_id: i64,
    pub secret_code: String,
    pub link: String,
}

impl VerificationNotice {
    pub fn new(
        base_url: &str,
        username: String,
        full_name: String,
        email: String,
        email_id: i64,
        secret_code: String,
    ) -> Self {
        let link = format!(
            "{}?email_id={}&secret_code={}",
            base_url, email_id, secret_code
        );
        Self {
            username,
            full_name,
            email,
            email_id,
            secret_code,
            link,
        }
    }
}

#[async_trait]
pub trait VerificationNotifier: Send + Sync {
    async fn send_verification(&self, notice: VerificationNotice) -> Result<(), anyhow::Error>;
}

/// Writes the notice to the structured log. Used when no mail transport is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl VerificationNotifier for LogNotifier {
    async fn send_verification(&self, notice: VerificationNotice) -> Result<(), anyhow::Error> {
        info!(
            username = %notice.username,
            email = %notice.email,
            email_id = notice.email_id,
            "Verification email queued"
        );
        tracing::debug!(link = %notice.link, "Verification link");
        Ok(())
    }
}

/// Keeps every notice in memory so tests can read back the secret code.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<VerificationNotice>>>,
}

impl MockNotifier {
    pub fn sent(&self) -> Vec<VerificationNotice> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_for(&self, username: &str) -> Option<VerificationNotice> {
        self.sent()
            .into_iter()
            .rev()
            .find(|n| n.username == username)
    }
}

#[async_trait]
impl VerificationNotifier for MockNotifier {
    async fn send_verification(&self, notice: VerificationNotice) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("notifier lock poisoned"))?
            .push(notice);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_carries_id_and_code() {
        let notice = VerificationNotice::new(
            "http://localhost:8080/api/v1/verify_email",
            "alice".into(),
            "Alice".into(),
            "alice@example.com".into(),
            7,
            "abc".into(),
        );
        assert_eq!(
            notice.link,
            "http://localhost:8080/api/v1/verify_email?email_id=7&secret_code=abc"
        );
    }

    #[tokio::test]
    async fn mock_records_notices() {
        let notifier = MockNotifier::default();
        let notice = VerificationNotice::new(
            "http://x",
            "alice".into(),
            "Alice".into(),
            "alice@example.com".into(),
            1,
            "code".into(),
        );
        notifier.send_verification(notice.clone()).await.unwrap();
        assert_eq!(notifier.last_for("alice"), Some(notice));
        assert!(notifier.last_for("bob").is_none());
    }
}
