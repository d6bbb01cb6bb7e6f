//! Email job payloads.
//!
//! `EmailJob` is the single payload type flowing through the email stream,
//! a tagged union over the three delivery paths:
//! - `Immediate`: send as soon as a worker picks it up
//! - `Retry`: re-attempt a previously failed immediate send
//! - `Scheduled`: send at a point in time, optionally recurring
//!
//! Adding a new delivery path is a new variant plus a match arm in the
//! processor; the dispatch is exhaustive by construction.

use crate::models::EmailPriority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stream_worker::{JobPriority, StreamJob};
use uuid::Uuid;

/// What the email body is built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmailContent {
    /// Render a registered template with the job's context.
    Template { name: String },
    /// Pre-built subject and body; context variables are still substituted.
    Inline {
        subject: String,
        text: Option<String>,
        html: Option<String>,
    },
}

impl EmailContent {
    /// Create template content.
    pub fn template(name: impl Into<String>) -> Self {
        Self::Template { name: name.into() }
    }

    /// Create inline content with a plain-text body.
    pub fn inline_text(subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Inline {
            subject: subject.into(),
            text: Some(text.into()),
            html: None,
        }
    }

    /// Descriptor recorded on the delivery log (`template_used`).
    pub fn descriptor(&self) -> &str {
        match self {
            Self::Template { name } => name,
            Self::Inline { .. } => "inline",
        }
    }
}

/// Day of week for weekly recurrence, numbered from Sunday.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    /// Numeric day, Sunday = 0 through Saturday = 6.
    pub fn number_from_sunday(self) -> u32 {
        self as u32
    }
}

/// How often a recurring schedule repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Declarative description of how a schedule repeats.
///
/// Read-only from the processor's point of view: each occurrence is a
/// freshly enqueued job carrying a copy of the rule, never an in-place
/// edit of the prior one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub pattern: RecurrencePattern,
    /// Every N days/weeks/months/years. Values below 1 are treated as 1.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// For weekly patterns: which weekdays to fire on. Empty means every
    /// `interval` weeks from the current occurrence.
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
    /// For monthly patterns: pin occurrences to this day, clamped to the
    /// target month's length.
    pub day_of_month: Option<u32>,
    /// No occurrence is enqueued past this instant.
    pub end_date: Option<DateTime<Utc>>,
    /// Carried for forward compatibility; not enforced by the processor.
    pub max_occurrences: Option<u32>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    pub fn daily() -> Self {
        Self::new(RecurrencePattern::Daily)
    }

    pub fn weekly(days: Vec<Weekday>) -> Self {
        Self {
            days_of_week: days,
            ..Self::new(RecurrencePattern::Weekly)
        }
    }

    pub fn monthly(day_of_month: u32) -> Self {
        Self {
            day_of_month: Some(day_of_month),
            ..Self::new(RecurrencePattern::Monthly)
        }
    }

    pub fn yearly() -> Self {
        Self::new(RecurrencePattern::Yearly)
    }

    fn new(pattern: RecurrencePattern) -> Self {
        Self {
            pattern,
            interval: 1,
            days_of_week: Vec::new(),
            day_of_month: None,
            end_date: None,
            max_occurrences: None,
        }
    }

    /// Set the repeat interval.
    pub fn every(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    /// Stop enqueuing occurrences past this instant.
    pub fn until(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }
}

/// One-shot or repeating schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Once,
    Recurring,
}

/// A "send now" request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmediateJob {
    /// Job id; doubles as the delivery-log id so redeliveries of this
    /// queue entry converge on the same log row.
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub recipient: String,
    pub content: EmailContent,
    /// Template/substitution variables.
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub priority: EmailPriority,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

fn default_max_retries() -> u32 {
    3
}

impl ImmediateJob {
    pub fn new(recipient: impl Into<String>, content: EmailContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            recipient: recipient.into(),
            content,
            context: Value::Null,
            priority: EmailPriority::Normal,
            max_retries: default_max_retries(),
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_priority(mut self, priority: EmailPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A re-attempt of a failed immediate send.
///
/// Carries the full original payload so the retry can re-render content
/// without refetching anything but the delivery log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryJob {
    pub original_job_id: Uuid,
    pub delivery_log_id: Uuid,
    /// 1 for the first retry, incremented on each subsequent one.
    pub attempt_number: u32,
    pub original_payload: Box<ImmediateJob>,
}

impl RetryJob {
    /// Build the follow-up retry job after this attempt failed.
    pub fn next_attempt(&self) -> Self {
        Self {
            original_job_id: self.original_job_id,
            delivery_log_id: self.delivery_log_id,
            attempt_number: self.attempt_number + 1,
            original_payload: self.original_payload.clone(),
        }
    }
}

/// A "send at time T" request, one-shot or recurring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Occurrence id; doubles as the delivery-log id for this occurrence.
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub user_id: Option<Uuid>,
    pub recipient: String,
    pub content: EmailContent,
    #[serde(default)]
    pub context: Value,
    pub scheduled_at: DateTime<Utc>,
    pub schedule_type: ScheduleType,
    pub recurrence: Option<RecurrenceRule>,
    /// "UTC" or a fixed offset like "+05:30". Unparseable values fall
    /// back to UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// On a recurring schedule, a global unsubscribe cancels the whole
    /// schedule instead of skipping one occurrence.
    #[serde(default)]
    pub cancel_on_unsubscribe: bool,
    /// Skip this occurrence if the recipient has unread mail from us.
    #[serde(default)]
    pub skip_if_unread: bool,
    /// Preference categories this send belongs to.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub priority: EmailPriority,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl ScheduledJob {
    pub fn once(
        schedule_id: Uuid,
        recipient: impl Into<String>,
        content: EmailContent,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            user_id: None,
            recipient: recipient.into(),
            content,
            context: Value::Null,
            scheduled_at,
            schedule_type: ScheduleType::Once,
            recurrence: None,
            timezone: default_timezone(),
            cancel_on_unsubscribe: false,
            skip_if_unread: false,
            categories: Vec::new(),
            priority: EmailPriority::Normal,
        }
    }

    pub fn recurring(
        schedule_id: Uuid,
        recipient: impl Into<String>,
        content: EmailContent,
        scheduled_at: DateTime<Utc>,
        recurrence: RecurrenceRule,
    ) -> Self {
        Self {
            schedule_type: ScheduleType::Recurring,
            recurrence: Some(recurrence),
            ..Self::once(schedule_id, recipient, content, scheduled_at)
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_priority(mut self, priority: EmailPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn cancel_on_unsubscribe(mut self) -> Self {
        self.cancel_on_unsubscribe = true;
        self
    }

    pub fn skip_if_unread(mut self) -> Self {
        self.skip_if_unread = true;
        self
    }

    /// The job for the next occurrence of this schedule: a new occurrence
    /// id and time, everything else carried over.
    ///
    /// The id is derived from `(schedule_id, scheduled_at)` rather than
    /// random, so a redelivered queue entry that advances the schedule
    /// again produces the same next-occurrence job instead of forking the
    /// recurrence chain.
    pub fn next_occurrence(&self, scheduled_at: DateTime<Utc>) -> Self {
        let id = Uuid::new_v5(
            &self.schedule_id,
            scheduled_at.timestamp_millis().to_be_bytes().as_slice(),
        );
        Self {
            id,
            scheduled_at,
            ..self.clone()
        }
    }
}

/// The job union flowing through the email stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmailJob {
    Immediate(ImmediateJob),
    Retry(RetryJob),
    Scheduled(ScheduledJob),
}

impl EmailJob {
    /// Build the first retry job for a failed immediate send.
    pub fn first_retry(payload: &ImmediateJob, delivery_log_id: Uuid) -> Self {
        Self::Retry(RetryJob {
            original_job_id: payload.id,
            delivery_log_id,
            attempt_number: 1,
            original_payload: Box::new(payload.clone()),
        })
    }

    pub fn recipient(&self) -> &str {
        match self {
            Self::Immediate(j) => &j.recipient,
            Self::Retry(j) => &j.original_payload.recipient,
            Self::Scheduled(j) => &j.recipient,
        }
    }
}

impl StreamJob for EmailJob {
    fn job_id(&self) -> String {
        match self {
            Self::Immediate(j) => j.id.to_string(),
            // Deterministic per (log, attempt) so a redelivered retry
            // entry is recognizable in the logs.
            Self::Retry(j) => format!("{}:retry:{}", j.delivery_log_id, j.attempt_number),
            Self::Scheduled(j) => j.id.to_string(),
        }
    }

    fn priority(&self) -> JobPriority {
        let priority = match self {
            Self::Immediate(j) => &j.priority,
            Self::Retry(j) => &j.original_payload.priority,
            Self::Scheduled(j) => &j.priority,
        };
        priority.to_job_priority()
    }

    fn job_type(&self) -> &'static str {
        match self {
            Self::Immediate(_) => "email.immediate",
            Self::Retry(_) => "email.retry",
            Self::Scheduled(_) => "email.scheduled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_kind_tag_roundtrip() {
        let job = EmailJob::Immediate(
            ImmediateJob::new("user@example.com", EmailContent::template("welcome"))
                .with_context(json!({"name": "Ada"})),
        );

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "immediate");
        assert_eq!(json["content"]["type"], "template");
        assert_eq!(json["content"]["name"], "welcome");

        let back: EmailJob = serde_json::from_value(json).unwrap();
        assert!(matches!(back, EmailJob::Immediate(_)));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = serde_json::from_value::<EmailJob>(json!({
            "kind": "broadcast",
            "recipient": "user@example.com"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_job_id_is_deterministic() {
        let payload = ImmediateJob::new("user@example.com", EmailContent::template("welcome"));
        let log_id = Uuid::new_v4();

        let retry = EmailJob::first_retry(&payload, log_id);
        assert_eq!(retry.job_id(), format!("{}:retry:1", log_id));

        if let EmailJob::Retry(r) = retry {
            let next = r.next_attempt();
            assert_eq!(next.attempt_number, 2);
            assert_eq!(next.original_payload.id, payload.id);
        }
    }

    #[test]
    fn test_recurrence_rule_defaults() {
        let json = json!({"pattern": "weekly", "days_of_week": ["monday", "friday"]});
        let rule: RecurrenceRule = serde_json::from_value(json).unwrap();

        assert_eq!(rule.pattern, RecurrencePattern::Weekly);
        assert_eq!(rule.interval, 1);
        assert_eq!(rule.days_of_week, vec![Weekday::Monday, Weekday::Friday]);
        assert!(rule.end_date.is_none());
    }

    #[test]
    fn test_next_occurrence_gets_fresh_id() {
        let job = ScheduledJob::recurring(
            Uuid::new_v4(),
            "user@example.com",
            EmailContent::template("digest"),
            Utc::now(),
            RecurrenceRule::daily(),
        );

        let next = job.next_occurrence(Utc::now() + chrono::Duration::days(1));
        assert_ne!(next.id, job.id);
        assert_eq!(next.schedule_id, job.schedule_id);
        assert_eq!(next.recipient, job.recipient);
    }

    #[test]
    fn test_next_occurrence_id_is_deterministic() {
        let job = ScheduledJob::recurring(
            Uuid::new_v4(),
            "user@example.com",
            EmailContent::template("digest"),
            Utc::now(),
            RecurrenceRule::daily(),
        );
        let at = Utc::now() + chrono::Duration::days(1);

        // Advancing the same schedule to the same time twice must yield
        // the same occurrence id, or a redelivery would fork the chain
        assert_eq!(job.next_occurrence(at).id, job.next_occurrence(at).id);
        assert_ne!(
            job.next_occurrence(at).id,
            job.next_occurrence(at + chrono::Duration::days(1)).id
        );
    }

    #[test]
    fn test_weekday_numbering() {
        assert_eq!(Weekday::Sunday.number_from_sunday(), 0);
        assert_eq!(Weekday::Wednesday.number_from_sunday(), 3);
        assert_eq!(Weekday::Saturday.number_from_sunday(), 6);
    }
}
