//! Job queue seam.
//!
//! Processors and the service enqueue follow-up jobs (retries, next
//! occurrences, reschedules) through this trait rather than talking to
//! the producer directly, so tests can capture what would have been
//! queued.

use crate::job::EmailJob;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use stream_worker::{EnqueueOptions, StreamError, StreamProducer};
use tokio::sync::Mutex;

/// At-least-once job queue with native delay support.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job; returns a queue-assigned id.
    async fn enqueue(&self, job: &EmailJob, options: EnqueueOptions) -> Result<String, StreamError>;
}

#[async_trait]
impl JobQueue for StreamProducer {
    async fn enqueue(&self, job: &EmailJob, options: EnqueueOptions) -> Result<String, StreamError> {
        self.send_with_options(job, options).await
    }
}

/// A job captured by [`RecordingQueue`].
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: EmailJob,
    pub delay: Option<Duration>,
}

/// Queue double that records enqueued jobs instead of sending them.
#[derive(Clone, Default)]
pub struct RecordingQueue {
    jobs: Arc<Mutex<Vec<QueuedJob>>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured jobs, in enqueue order.
    pub async fn jobs(&self) -> Vec<QueuedJob> {
        self.jobs.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Remove and return all captured jobs. Lets a test drive a
    /// retry/recurrence chain by feeding them back into a processor.
    pub async fn drain(&self) -> Vec<QueuedJob> {
        self.jobs.lock().await.drain(..).collect()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: &EmailJob, options: EnqueueOptions) -> Result<String, StreamError> {
        use stream_worker::StreamJob;

        let id = job.job_id();
        self.jobs.lock().await.push(QueuedJob {
            job: job.clone(),
            delay: options.delay,
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EmailContent, ImmediateJob};

    #[tokio::test]
    async fn test_recording_queue_captures_delay() {
        let queue = RecordingQueue::new();
        let job = EmailJob::Immediate(ImmediateJob::new(
            "user@example.com",
            EmailContent::template("welcome"),
        ));

        queue
            .enqueue(&job, EnqueueOptions::delayed(Duration::from_secs(120)))
            .await
            .unwrap();

        let jobs = queue.drain().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].delay, Some(Duration::from_secs(120)));
        assert!(queue.is_empty().await);
    }
}
