//! Delivery service: the producer-side API for queueing email jobs.
//!
//! Thin layer over the job queue; it validates input, stamps defaults,
//! and computes the queue delay for scheduled jobs. All real delivery
//! work happens in the worker-side `DeliveryProcessor`.

use crate::error::{DeliveryError, DeliveryResult};
use crate::job::{EmailContent, EmailJob, ImmediateJob, ScheduledJob};
use crate::queue::JobQueue;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use stream_worker::EnqueueOptions;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for the delivery service.
#[derive(Debug, Clone)]
pub struct DeliveryServiceConfig {
    /// Application name used in default template data.
    pub app_name: String,
    /// Retry budget stamped on immediate jobs that don't set their own.
    pub default_max_retries: u32,
}

impl Default for DeliveryServiceConfig {
    fn default() -> Self {
        Self {
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Notifications".to_string()),
            default_max_retries: std::env::var("EMAIL_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
        }
    }
}

/// Producer-side API for queueing immediate and scheduled emails.
#[derive(Clone)]
pub struct DeliveryService {
    queue: Arc<dyn JobQueue>,
    config: DeliveryServiceConfig,
}

impl DeliveryService {
    /// Create a new delivery service.
    pub fn new(queue: Arc<dyn JobQueue>, config: DeliveryServiceConfig) -> Self {
        Self { queue, config }
    }

    /// Create a delivery service with the default config.
    pub fn with_default_config(queue: Arc<dyn JobQueue>) -> Self {
        Self::new(queue, DeliveryServiceConfig::default())
    }

    /// Queue an immediate send. Returns the job id, which is also the
    /// delivery-log id to watch for the outcome.
    pub async fn send_now(&self, job: ImmediateJob) -> DeliveryResult<Uuid> {
        validate_recipient(&job.recipient)?;

        let priority = job.priority.to_job_priority();
        let id = job.id;
        let job = EmailJob::Immediate(job);

        self.queue
            .enqueue(&job, EnqueueOptions::immediate().with_priority(priority))
            .await?;

        debug!(job_id = %id, "Queued immediate email job");
        Ok(id)
    }

    /// Queue an immediate templated send.
    pub async fn send_template(
        &self,
        recipient: &str,
        template: &str,
        context: serde_json::Value,
    ) -> DeliveryResult<Uuid> {
        let job = ImmediateJob::new(recipient, EmailContent::template(template))
            .with_context(context)
            .with_max_retries(self.config.default_max_retries);
        self.send_now(job).await
    }

    /// Queue a welcome email for a new user.
    pub async fn send_welcome(
        &self,
        user_id: Uuid,
        email: &str,
        name: &str,
    ) -> DeliveryResult<Uuid> {
        let job = ImmediateJob::new(email, EmailContent::template("welcome"))
            .with_user(user_id)
            .with_context(json!({
                "name": name,
                "app_name": self.config.app_name,
            }))
            .with_max_retries(self.config.default_max_retries);

        let id = self.send_now(job).await?;

        info!(
            user_id = %user_id,
            email = %email,
            job_id = %id,
            "Queued welcome email"
        );
        Ok(id)
    }

    /// Queue a scheduled (possibly recurring) send. The job is parked
    /// until its `scheduled_at`; a past timestamp means "now".
    pub async fn schedule(&self, job: ScheduledJob) -> DeliveryResult<Uuid> {
        validate_recipient(&job.recipient)?;

        let id = job.id;
        let schedule_id = job.schedule_id;
        let scheduled_at = job.scheduled_at;
        let delay = (scheduled_at - Utc::now()).to_std().unwrap_or_default();

        self.queue
            .enqueue(
                &EmailJob::Scheduled(job),
                EnqueueOptions::delayed(delay),
            )
            .await?;

        info!(
            schedule_id = %schedule_id,
            job_id = %id,
            scheduled_at = %scheduled_at,
            "Queued scheduled email job"
        );
        Ok(id)
    }
}

fn validate_recipient(recipient: &str) -> DeliveryResult<()> {
    if recipient.trim().is_empty() || !recipient.contains('@') {
        return Err(DeliveryError::InvalidInput(format!(
            "invalid recipient address: '{}'",
            recipient
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RecurrenceRule;
    use crate::queue::RecordingQueue;

    fn service() -> (DeliveryService, RecordingQueue) {
        let queue = RecordingQueue::new();
        let service = DeliveryService::new(
            Arc::new(queue.clone()),
            DeliveryServiceConfig {
                app_name: "TestApp".to_string(),
                default_max_retries: 3,
            },
        );
        (service, queue)
    }

    #[tokio::test]
    async fn test_send_now_queues_immediate_job() {
        let (service, queue) = service();

        let id = service
            .send_template("user@example.com", "welcome", json!({"name": "Ada"}))
            .await
            .unwrap();

        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].delay.is_none());
        match &jobs[0].job {
            EmailJob::Immediate(job) => {
                assert_eq!(job.id, id);
                assert_eq!(job.recipient, "user@example.com");
                assert_eq!(job.max_retries, 3);
            }
            other => panic!("unexpected job: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_recipient() {
        let (service, queue) = service();

        let result = service.send_template("not-an-address", "welcome", json!({})).await;
        assert!(matches!(result, Err(DeliveryError::InvalidInput(_))));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_schedule_parks_until_due() {
        let (service, queue) = service();

        let at = Utc::now() + chrono::Duration::hours(1);
        let job = ScheduledJob::recurring(
            Uuid::new_v4(),
            "user@example.com",
            EmailContent::template("welcome"),
            at,
            RecurrenceRule::daily(),
        );

        service.schedule(job).await.unwrap();

        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        let delay = jobs[0].delay.unwrap();
        assert!(delay > std::time::Duration::from_secs(3500));
        assert!(delay <= std::time::Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_schedule_in_the_past_runs_now() {
        let (service, queue) = service();

        let job = ScheduledJob::once(
            Uuid::new_v4(),
            "user@example.com",
            EmailContent::template("welcome"),
            Utc::now() - chrono::Duration::minutes(5),
        );

        service.schedule(job).await.unwrap();
        assert_eq!(queue.jobs().await[0].delay, Some(std::time::Duration::ZERO));
    }
}
