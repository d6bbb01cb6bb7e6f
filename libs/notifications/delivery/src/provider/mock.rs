//! Mock email provider for testing

use super::{EmailProvider, SendResult};
use crate::models::Email;
use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

enum FailPlan {
    Never,
    Always(String),
    /// Fail the next N sends, then succeed.
    Times(u32, String),
}

/// Mock email provider that captures sent emails
pub struct MockSmtpProvider {
    sent_emails: Arc<Mutex<Vec<Email>>>,
    attempts: Arc<Mutex<u32>>,
    plan: Arc<Mutex<FailPlan>>,
}

impl MockSmtpProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        Self::with_plan(FailPlan::Never)
    }

    /// Create a mock provider that always fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_plan(FailPlan::Always(message.into()))
    }

    /// Create a mock provider that fails the first `count` sends, then
    /// succeeds.
    pub fn failing_times(count: u32, message: impl Into<String>) -> Self {
        Self::with_plan(FailPlan::Times(count, message.into()))
    }

    fn with_plan(plan: FailPlan) -> Self {
        Self {
            sent_emails: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(Mutex::new(0)),
            plan: Arc::new(Mutex::new(plan)),
        }
    }

    /// Get all sent emails
    pub async fn sent_emails(&self) -> Vec<Email> {
        self.sent_emails.lock().await.clone()
    }

    /// Get the count of sent emails
    pub async fn sent_count(&self) -> usize {
        self.sent_emails.lock().await.len()
    }

    /// Total number of send attempts, successful or not
    pub async fn attempt_count(&self) -> u32 {
        *self.attempts.lock().await
    }

    /// Clear all sent emails
    pub async fn clear(&self) {
        self.sent_emails.lock().await.clear();
        *self.attempts.lock().await = 0;
    }

    /// Check if an email was sent to a specific address
    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent_emails
            .lock()
            .await
            .iter()
            .any(|e| e.to == email)
    }
}

impl Default for MockSmtpProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailProvider for MockSmtpProvider {
    async fn send(&self, email: &Email) -> Result<SendResult> {
        *self.attempts.lock().await += 1;

        let mut plan = self.plan.lock().await;
        match &mut *plan {
            FailPlan::Never => {}
            FailPlan::Always(message) => return Err(eyre::eyre!(message.clone())),
            FailPlan::Times(remaining, message) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(eyre::eyre!(message.clone()));
                }
            }
        }
        drop(plan);

        self.sent_emails.lock().await.push(email.clone());

        Ok(SendResult {
            message_id: format!("mock-{}", email.id),
        })
    }

    async fn health_check(&self) -> Result<()> {
        if matches!(&*self.plan.lock().await, FailPlan::Always(_)) {
            return Err(eyre::eyre!("Mock health check failed"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_sends_email() {
        let provider = MockSmtpProvider::new();

        let email = Email::new("test@example.com", "Test Subject").with_text("Test body");

        let result = provider.send(&email).await;
        assert!(result.is_ok());

        let sent = provider.sent_emails().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "test@example.com");
    }

    #[tokio::test]
    async fn test_mock_provider_fails() {
        let provider = MockSmtpProvider::failing("Simulated failure");

        let email = Email::new("test@example.com", "Test Subject").with_text("Test body");

        let result = provider.send(&email).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Simulated failure"));
        assert_eq!(provider.sent_count().await, 0);
        assert_eq!(provider.attempt_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_provider_fails_then_recovers() {
        let provider = MockSmtpProvider::failing_times(2, "connection reset");
        let email = Email::new("test@example.com", "Test").with_text("Body");

        assert!(provider.send(&email).await.is_err());
        assert!(provider.send(&email).await.is_err());
        assert!(provider.send(&email).await.is_ok());
        assert_eq!(provider.attempt_count().await, 3);
        assert_eq!(provider.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_provider_was_sent_to() {
        let provider = MockSmtpProvider::new();

        let email = Email::new("user@example.com", "Test").with_text("Body");
        provider.send(&email).await.unwrap();

        assert!(provider.was_sent_to("user@example.com").await);
        assert!(!provider.was_sent_to("other@example.com").await);
    }
}
