//! Delivery log: the durable record of one send attempt's lifecycle.
//!
//! The log is the single source of truth for whether an email went out.
//! Status moves `Pending -> Sent` or `Pending -> Failed` and never leaves
//! a terminal state; every processor re-reads the row and no-ops when it
//! is already settled, which is what makes at-least-once queue delivery
//! safe against duplicate sends.

mod memory;
mod redis_store;

pub use memory::InMemoryDeliveryLogStore;
pub use redis_store::RedisDeliveryLogStore;

use crate::job::{ImmediateJob, ScheduledJob};
use crate::models::EmailPriority;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of one delivery attempt chain.
///
/// `Delivered` (recipient-side confirmation) is an external webhook
/// signal and is never produced here.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Durable record of one send attempt's lifecycle and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub recipient_email: String,
    /// Present for occurrences of a schedule.
    pub schedule_id: Option<Uuid>,
    /// Template name, or "inline" for pre-built content.
    pub template_used: String,
    /// Filled once the content has been rendered.
    pub subject: Option<String>,
    pub status: DeliveryStatus,
    /// Attempts processed so far; incremented once per retry job, never
    /// past `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: EmailPriority,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Fields for creating a delivery log row.
///
/// The id is supplied by the caller (it is the job/occurrence id) so a
/// redelivered queue entry converges on the row created by the first
/// delivery instead of minting a duplicate.
#[derive(Debug, Clone)]
pub struct NewDeliveryLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub recipient_email: String,
    pub schedule_id: Option<Uuid>,
    pub template_used: String,
    pub priority: EmailPriority,
    pub max_retries: u32,
}

impl NewDeliveryLog {
    pub fn from_immediate(job: &ImmediateJob) -> Self {
        Self {
            id: job.id,
            user_id: job.user_id,
            recipient_email: job.recipient.clone(),
            schedule_id: None,
            template_used: job.content.descriptor().to_string(),
            priority: job.priority.clone(),
            max_retries: job.max_retries,
        }
    }

    /// Scheduled occurrences are one-shot; failures are terminal for
    /// the occurrence, so no retry budget.
    pub fn from_scheduled(job: &ScheduledJob) -> Self {
        Self {
            id: job.id,
            user_id: job.user_id,
            recipient_email: job.recipient.clone(),
            schedule_id: Some(job.schedule_id),
            template_used: job.content.descriptor().to_string(),
            priority: job.priority.clone(),
            max_retries: 0,
        }
    }

    pub(crate) fn into_log(self, now: DateTime<Utc>) -> DeliveryLog {
        DeliveryLog {
            id: self.id,
            user_id: self.user_id,
            recipient_email: self.recipient_email,
            schedule_id: self.schedule_id,
            template_used: self.template_used,
            subject: None,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            priority: self.priority,
            provider_message_id: None,
            error_message: None,
            created_at: now,
            sent_at: None,
            failed_at: None,
        }
    }
}

/// Result of a conditional status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied by this caller.
    Applied,
    /// The row was already in a terminal state; nothing changed.
    AlreadyTerminal(DeliveryStatus),
    /// No row with that id.
    NotFound,
}

/// Storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt delivery log {id}: {message}")]
    Corrupt { id: Uuid, message: String },
}

/// Durable store for delivery logs.
///
/// The conditional operations (`mark_sent`, `mark_failed`,
/// `record_attempt`) must be atomic check-then-act against the backing
/// store: two workers racing on the same row must observe exactly one
/// winner.
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// Create the row, or return the existing one if the id is already
    /// present (redelivered queue entry).
    async fn create(&self, new: NewDeliveryLog) -> Result<DeliveryLog, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<DeliveryLog>, StoreError>;

    /// Record the rendered subject. No-op on a missing row.
    async fn set_subject(&self, id: Uuid, subject: &str) -> Result<(), StoreError>;

    /// `Pending -> Sent`, recording the provider message id and sent_at.
    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: &str,
    ) -> Result<TransitionOutcome, StoreError>;

    /// `Pending -> Failed`, recording the error and failed_at.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<TransitionOutcome, StoreError>;

    /// Increment `retry_count` if the row is still pending and under its
    /// retry budget. Returns the updated row when the increment applied,
    /// `None` when the row is missing, terminal, or exhausted.
    async fn record_attempt(&self, id: Uuid) -> Result<Option<DeliveryLog>, StoreError>;
}
