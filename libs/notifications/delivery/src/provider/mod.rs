//! Email transport providers.

mod mock;
mod smtp;

pub use mock::MockSmtpProvider;
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::models::Email;
use async_trait::async_trait;
use eyre::Result;

/// Result of a successful send
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Provider-assigned message id
    pub message_id: String,
}

/// Transport client trait: the network edge that actually delivers a
/// rendered email.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send an email
    async fn send(&self, email: &Email) -> Result<SendResult>;

    /// Check provider connectivity
    async fn health_check(&self) -> Result<()>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
