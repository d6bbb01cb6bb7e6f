//! End-to-end delivery flows against in-memory collaborators.
//!
//! Jobs are fed straight into the processor; follow-up jobs (retries,
//! next occurrences) are captured by a recording queue and fed back in
//! by the tests, standing in for the stream worker loop.

use chrono::{Duration as ChronoDuration, Utc};
use email_delivery::{
    AllowAllGate, DeliveryLogStore, DeliveryProcessor, DeliveryStatus, EmailContent, EmailJob,
    GateCheck, ImmediateJob, InMemoryDeliveryLogStore, MockSmtpProvider, NewDeliveryLog,
    PreferenceGate, QueuedJob, RecordingQueue, RecurrenceRule, ScheduledJob, StaticGate,
    TemplateEngine,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stream_worker::{StreamError, StreamEvent, StreamProcessor};
use uuid::Uuid;

struct Harness {
    store: InMemoryDeliveryLogStore,
    provider: Arc<MockSmtpProvider>,
    queue: RecordingQueue,
    processor: DeliveryProcessor,
}

fn harness(provider: MockSmtpProvider, gate: impl PreferenceGate + 'static) -> Harness {
    let store = InMemoryDeliveryLogStore::new();
    let provider = Arc::new(provider);
    let queue = RecordingQueue::new();

    let processor = DeliveryProcessor::new(
        Arc::new(store.clone()),
        Arc::new(TemplateEngine::new().unwrap()),
        provider.clone(),
        Arc::new(gate),
        Arc::new(queue.clone()),
    )
    .with_from("noreply@test.local", "Test");

    Harness {
        store,
        provider,
        queue,
        processor,
    }
}

async fn run(processor: &DeliveryProcessor, job: EmailJob) -> Result<(), StreamError> {
    let event = StreamEvent::new(format!("{}-0", Utc::now().timestamp_millis()), job);
    processor.process(&event).await
}

fn welcome_job() -> ImmediateJob {
    ImmediateJob::new("user@example.com", EmailContent::template("welcome"))
        .with_context(json!({"name": "Ada", "app_name": "TestApp"}))
}

async fn drain_one(queue: &RecordingQueue) -> QueuedJob {
    let mut jobs = queue.drain().await;
    assert_eq!(jobs.len(), 1, "expected exactly one queued job");
    jobs.remove(0)
}

#[tokio::test]
async fn welcome_email_succeeds_on_first_attempt() {
    let h = harness(MockSmtpProvider::new(), AllowAllGate);
    let job = welcome_job();
    let log_id = job.id;

    run(&h.processor, EmailJob::Immediate(job)).await.unwrap();

    let log = h.store.get(log_id).await.unwrap().unwrap();
    assert_eq!(log.status, DeliveryStatus::Sent);
    assert_eq!(log.retry_count, 0);
    assert!(log.provider_message_id.is_some());
    assert!(log.sent_at.is_some());
    assert!(log.subject.unwrap().contains("Welcome"));

    assert_eq!(h.provider.sent_count().await, 1);
    assert!(h.provider.was_sent_to("user@example.com").await);
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn transient_failures_retry_with_backoff_then_succeed() {
    // Fails twice, succeeds on the third transport call
    let h = harness(
        MockSmtpProvider::failing_times(2, "connection timed out"),
        AllowAllGate,
    );
    let job = welcome_job();
    let log_id = job.id;

    // Dispatch: transport fails, first retry queued at 2 minutes
    run(&h.processor, EmailJob::Immediate(job)).await.unwrap();
    let queued = drain_one(&h.queue).await;
    assert_eq!(queued.delay, Some(Duration::from_secs(120)));
    assert!(matches!(queued.job, EmailJob::Retry(ref r) if r.attempt_number == 1));

    let log = h.store.get(log_id).await.unwrap().unwrap();
    assert_eq!(log.status, DeliveryStatus::Pending);
    assert_eq!(log.retry_count, 0);

    // Retry 1: fails again, second retry queued at 4 minutes
    run(&h.processor, queued.job).await.unwrap();
    let queued = drain_one(&h.queue).await;
    assert_eq!(queued.delay, Some(Duration::from_secs(240)));
    assert!(matches!(queued.job, EmailJob::Retry(ref r) if r.attempt_number == 2));

    // Retry 2: succeeds
    run(&h.processor, queued.job).await.unwrap();
    assert!(h.queue.is_empty().await);

    let log = h.store.get(log_id).await.unwrap().unwrap();
    assert_eq!(log.status, DeliveryStatus::Sent);
    assert_eq!(log.retry_count, 2);
    assert_eq!(h.provider.attempt_count().await, 3);
    assert_eq!(h.provider.sent_count().await, 1);
}

#[tokio::test]
async fn retry_for_sent_log_makes_no_transport_call() {
    let h = harness(MockSmtpProvider::new(), AllowAllGate);
    let job = welcome_job();

    let log = h
        .store
        .create(NewDeliveryLog::from_immediate(&job))
        .await
        .unwrap();
    h.store.mark_sent(log.id, "msg-already").await.unwrap();

    // Duplicate retry delivery for an already-settled chain
    run(&h.processor, EmailJob::first_retry(&job, log.id))
        .await
        .unwrap();

    assert_eq!(h.provider.attempt_count().await, 0);
    let log = h.store.get(log.id).await.unwrap().unwrap();
    assert_eq!(log.status, DeliveryStatus::Sent);
    assert_eq!(log.provider_message_id.as_deref(), Some("msg-already"));
}

#[tokio::test]
async fn exhausted_budget_fails_without_transport_call() {
    let h = harness(MockSmtpProvider::new(), AllowAllGate);
    let job = welcome_job().with_max_retries(0);

    // retry_count (0) already equals max_retries (0)
    let log = h
        .store
        .create(NewDeliveryLog::from_immediate(&job))
        .await
        .unwrap();

    run(&h.processor, EmailJob::first_retry(&job, log.id))
        .await
        .unwrap();

    assert_eq!(h.provider.attempt_count().await, 0);
    let log = h.store.get(log.id).await.unwrap().unwrap();
    assert_eq!(log.status, DeliveryStatus::Failed);
    assert_eq!(log.error_message.as_deref(), Some("max retries exceeded"));
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn permanent_transport_failure_enqueues_no_retry() {
    let h = harness(
        MockSmtpProvider::failing("invalid recipient address"),
        AllowAllGate,
    );
    let job = welcome_job();
    let log_id = job.id;

    let result = run(&h.processor, EmailJob::Immediate(job)).await;
    assert!(result.is_err());

    let log = h.store.get(log_id).await.unwrap().unwrap();
    assert_eq!(log.status, DeliveryStatus::Failed);
    assert!(log.error_message.unwrap().contains("invalid"));
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn unknown_template_fails_immediately() {
    let h = harness(MockSmtpProvider::new(), AllowAllGate);
    let job = ImmediateJob::new("user@example.com", EmailContent::template("no_such_template"));
    let log_id = job.id;

    let result = run(&h.processor, EmailJob::Immediate(job)).await;
    assert!(result.is_err());

    let log = h.store.get(log_id).await.unwrap().unwrap();
    assert_eq!(log.status, DeliveryStatus::Failed);
    assert!(log.error_message.unwrap().contains("Template not found"));
    assert_eq!(h.provider.attempt_count().await, 0);
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn redelivered_immediate_job_does_not_send_twice() {
    let h = harness(MockSmtpProvider::new(), AllowAllGate);
    let job = welcome_job();

    run(&h.processor, EmailJob::Immediate(job.clone()))
        .await
        .unwrap();
    // Same queue entry delivered again after a missed ack
    run(&h.processor, EmailJob::Immediate(job)).await.unwrap();

    assert_eq!(h.provider.sent_count().await, 1);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn quiet_hours_reschedule_without_sending() {
    let resume_at = Utc::now() + ChronoDuration::hours(2);
    let h = harness(
        MockSmtpProvider::new(),
        StaticGate::new().quiet_until(resume_at),
    );

    let job = ScheduledJob::once(
        Uuid::new_v4(),
        "user@example.com",
        EmailContent::template("welcome"),
        Utc::now(),
    )
    .with_context(json!({"name": "Ada", "app_name": "TestApp"}));
    let occurrence_id = job.id;

    run(&h.processor, EmailJob::Scheduled(job)).await.unwrap();

    assert_eq!(h.provider.attempt_count().await, 0);
    assert!(h.store.is_empty().await);

    let queued = drain_one(&h.queue).await;
    let delay = queued.delay.unwrap();
    assert!(delay > Duration::from_secs(7100) && delay <= Duration::from_secs(7200));
    // The identical occurrence, parked until quiet hours end
    assert!(matches!(queued.job, EmailJob::Scheduled(ref s) if s.id == occurrence_id));
}

#[tokio::test]
async fn unsubscribe_cancels_recurring_schedule() {
    let h = harness(
        MockSmtpProvider::new(),
        StaticGate::new().unsubscribe("gone@example.com"),
    );

    let job = ScheduledJob::recurring(
        Uuid::new_v4(),
        "gone@example.com",
        EmailContent::template("welcome"),
        Utc::now(),
        RecurrenceRule::daily(),
    )
    .cancel_on_unsubscribe();

    run(&h.processor, EmailJob::Scheduled(job)).await.unwrap();

    assert_eq!(h.provider.attempt_count().await, 0);
    assert!(h.store.is_empty().await);
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn category_block_skips_occurrence_but_advances_schedule() {
    let h = harness(
        MockSmtpProvider::new(),
        StaticGate::new().disable_category("digest"),
    );

    let start = Utc::now();
    let job = ScheduledJob::recurring(
        Uuid::new_v4(),
        "user@example.com",
        EmailContent::template("welcome"),
        start,
        RecurrenceRule::daily(),
    )
    .with_categories(vec!["digest".to_string()]);

    run(&h.processor, EmailJob::Scheduled(job)).await.unwrap();

    assert_eq!(h.provider.attempt_count().await, 0);
    let queued = drain_one(&h.queue).await;
    match queued.job {
        EmailJob::Scheduled(next) => {
            assert_eq!(next.scheduled_at, start + ChronoDuration::days(1));
        }
        other => panic!("unexpected job: {:?}", other),
    }
}

#[tokio::test]
async fn skip_if_unread_skips_occurrence() {
    let h = harness(
        MockSmtpProvider::new(),
        StaticGate::new().with_unread("busy@example.com"),
    );

    let job = ScheduledJob::once(
        Uuid::new_v4(),
        "busy@example.com",
        EmailContent::template("welcome"),
        Utc::now(),
    )
    .skip_if_unread();

    run(&h.processor, EmailJob::Scheduled(job)).await.unwrap();

    assert_eq!(h.provider.attempt_count().await, 0);
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn recurrence_stops_past_end_date() {
    let h = harness(MockSmtpProvider::new(), AllowAllGate);

    let start = Utc::now();
    let rule = RecurrenceRule::daily().until(start + ChronoDuration::days(2));
    let job = ScheduledJob::recurring(
        Uuid::new_v4(),
        "user@example.com",
        EmailContent::inline_text("Daily check-in", "Still here?"),
        start,
        rule,
    );

    let mut current = EmailJob::Scheduled(job);
    let mut occurrences = 0;

    // Day 0 and day 1 enqueue a successor; day 2 lands on the end date
    // and must enqueue nothing
    loop {
        run(&h.processor, current).await.unwrap();
        occurrences += 1;

        let mut queued = h.queue.drain().await;
        match queued.pop() {
            Some(next) => current = next.job,
            None => break,
        }
        assert!(occurrences < 10, "recurrence failed to terminate");
    }

    assert_eq!(occurrences, 3);
    assert_eq!(h.provider.sent_count().await, 3);
    assert_eq!(h.store.len().await, 3);
}

#[tokio::test]
async fn scheduled_send_failure_is_terminal_but_schedule_advances() {
    let h = harness(MockSmtpProvider::failing("timeout"), AllowAllGate);

    let job = ScheduledJob::recurring(
        Uuid::new_v4(),
        "user@example.com",
        EmailContent::inline_text("Digest", "News"),
        Utc::now(),
        RecurrenceRule::daily(),
    );
    let occurrence_id = job.id;

    run(&h.processor, EmailJob::Scheduled(job)).await.unwrap();

    // The occurrence failed terminally, no retry chain
    let log = h.store.get(occurrence_id).await.unwrap().unwrap();
    assert_eq!(log.status, DeliveryStatus::Failed);
    assert_eq!(log.max_retries, 0);

    // But the schedule still produced its next occurrence
    let queued = drain_one(&h.queue).await;
    assert!(matches!(queued.job, EmailJob::Scheduled(ref s) if s.id != occurrence_id));
}

#[tokio::test]
async fn redelivered_recurring_entry_does_not_fork_schedule() {
    let h = harness(MockSmtpProvider::new(), AllowAllGate);

    let job = ScheduledJob::recurring(
        Uuid::new_v4(),
        "user@example.com",
        EmailContent::inline_text("Digest", "News"),
        Utc::now(),
        RecurrenceRule::daily(),
    );

    // Same queue entry delivered twice after a missed ack
    run(&h.processor, EmailJob::Scheduled(job.clone()))
        .await
        .unwrap();
    run(&h.processor, EmailJob::Scheduled(job)).await.unwrap();

    // The send is deduped by the log
    assert_eq!(h.provider.sent_count().await, 1);

    // Both deliveries advanced the schedule, but to the same occurrence:
    // one chain, not a fork
    let queued = h.queue.drain().await;
    assert_eq!(queued.len(), 2);
    let ids: Vec<Uuid> = queued
        .iter()
        .map(|q| match &q.job {
            EmailJob::Scheduled(s) => s.id,
            other => panic!("unexpected job: {:?}", other),
        })
        .collect();
    assert_eq!(ids[0], ids[1]);
}

/// Gate that claims quiet hours but reports a resume time in the past.
struct StaleQuietGate;

#[async_trait::async_trait]
impl PreferenceGate for StaleQuietGate {
    async fn is_allowed(&self, _email: &str, _categories: &[String]) -> eyre::Result<GateCheck> {
        Ok(GateCheck::allowed())
    }

    async fn is_quiet_hours(&self, _email: &str) -> eyre::Result<bool> {
        Ok(true)
    }

    async fn next_allowed_time(&self, _email: &str) -> eyre::Result<chrono::DateTime<Utc>> {
        Ok(Utc::now() - ChronoDuration::hours(1))
    }

    async fn has_unread_emails(&self, _email: &str) -> eyre::Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn stale_quiet_hours_reschedule_keeps_a_minimum_delay() {
    let h = harness(MockSmtpProvider::new(), StaleQuietGate);

    let job = ScheduledJob::once(
        Uuid::new_v4(),
        "user@example.com",
        EmailContent::template("welcome"),
        Utc::now(),
    )
    .with_context(json!({"name": "Ada", "app_name": "TestApp"}));

    run(&h.processor, EmailJob::Scheduled(job)).await.unwrap();

    assert_eq!(h.provider.attempt_count().await, 0);
    let queued = drain_one(&h.queue).await;
    // A past resume time must not re-enqueue with zero delay
    assert!(queued.delay.unwrap() >= Duration::from_secs(60));
}

#[tokio::test]
async fn stale_retry_job_is_dropped() {
    let h = harness(MockSmtpProvider::new(), AllowAllGate);
    let job = welcome_job();

    // Log row never existed (garbage-collected or foreign)
    run(&h.processor, EmailJob::first_retry(&job, Uuid::new_v4()))
        .await
        .unwrap();

    assert_eq!(h.provider.attempt_count().await, 0);
    assert!(h.queue.is_empty().await);
}
