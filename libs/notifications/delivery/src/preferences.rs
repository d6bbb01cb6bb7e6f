//! Recipient preference gate.
//!
//! The gate decides whether an otherwise-due scheduled send should
//! proceed: global unsubscribe, per-category opt-out, quiet hours, and
//! the "skip while they still have unread mail from us" rule. A block
//! is a deliberate non-send, not a failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Result;
use std::collections::HashSet;

/// Why a send was blocked.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BlockReason {
    Unsubscribed,
    CategoryDisabled,
}

/// Outcome of an `is_allowed` check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateCheck {
    pub allowed: bool,
    pub reason: Option<BlockReason>,
}

impl GateCheck {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn blocked(reason: BlockReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Preference checks consulted by the scheduled processor.
#[async_trait]
pub trait PreferenceGate: Send + Sync {
    /// Whether this recipient accepts mail in any of the given
    /// categories (an empty list means "uncategorized, allowed unless
    /// unsubscribed").
    async fn is_allowed(&self, email: &str, categories: &[String]) -> Result<GateCheck>;

    /// Whether the recipient is currently inside their quiet hours.
    async fn is_quiet_hours(&self, email: &str) -> Result<bool>;

    /// When quiet hours end for this recipient.
    async fn next_allowed_time(&self, email: &str) -> Result<DateTime<Utc>>;

    /// Whether the recipient still has unread mail from us.
    async fn has_unread_emails(&self, email: &str) -> Result<bool>;
}

/// Gate that allows everything. Useful for transactional-only setups
/// and as a default.
#[derive(Debug, Clone, Default)]
pub struct AllowAllGate;

#[async_trait]
impl PreferenceGate for AllowAllGate {
    async fn is_allowed(&self, _email: &str, _categories: &[String]) -> Result<GateCheck> {
        Ok(GateCheck::allowed())
    }

    async fn is_quiet_hours(&self, _email: &str) -> Result<bool> {
        Ok(false)
    }

    async fn next_allowed_time(&self, _email: &str) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }

    async fn has_unread_emails(&self, _email: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Fixed-answer gate for tests and local setups.
#[derive(Debug, Clone, Default)]
pub struct StaticGate {
    unsubscribed: HashSet<String>,
    disabled_categories: HashSet<String>,
    quiet_until: Option<DateTime<Utc>>,
    unread: HashSet<String>,
}

impl StaticGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a recipient globally unsubscribed.
    pub fn unsubscribe(mut self, email: impl Into<String>) -> Self {
        self.unsubscribed.insert(email.into());
        self
    }

    /// Disable a category for all recipients.
    pub fn disable_category(mut self, category: impl Into<String>) -> Self {
        self.disabled_categories.insert(category.into());
        self
    }

    /// Put all recipients in quiet hours until the given instant.
    pub fn quiet_until(mut self, until: DateTime<Utc>) -> Self {
        self.quiet_until = Some(until);
        self
    }

    /// Mark a recipient as having unread mail from us.
    pub fn with_unread(mut self, email: impl Into<String>) -> Self {
        self.unread.insert(email.into());
        self
    }
}

#[async_trait]
impl PreferenceGate for StaticGate {
    async fn is_allowed(&self, email: &str, categories: &[String]) -> Result<GateCheck> {
        if self.unsubscribed.contains(email) {
            return Ok(GateCheck::blocked(BlockReason::Unsubscribed));
        }

        if categories
            .iter()
            .any(|c| self.disabled_categories.contains(c))
        {
            return Ok(GateCheck::blocked(BlockReason::CategoryDisabled));
        }

        Ok(GateCheck::allowed())
    }

    async fn is_quiet_hours(&self, _email: &str) -> Result<bool> {
        Ok(self.quiet_until.is_some_and(|until| until > Utc::now()))
    }

    async fn next_allowed_time(&self, _email: &str) -> Result<DateTime<Utc>> {
        Ok(self.quiet_until.unwrap_or_else(Utc::now))
    }

    async fn has_unread_emails(&self, email: &str) -> Result<bool> {
        Ok(self.unread.contains(email))
    }
}
