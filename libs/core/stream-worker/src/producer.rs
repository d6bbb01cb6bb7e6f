//! Stream producer for job enqueuing
//!
//! Generic producer that can be used by any service to queue jobs
//! for background processing, immediately or after a delay.
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_worker::{StreamProducer, StreamDef, EnqueueOptions};
//!
//! // Create producer from a StreamDef
//! let producer = StreamProducer::from_stream_def::<EmailStream>(redis);
//!
//! // Queue a job now
//! let message_id = producer.send(&job).await?;
//!
//! // Queue a job to become visible in five minutes
//! producer
//!     .send_with_options(&job, EnqueueOptions::delayed(Duration::from_secs(300)))
//!     .await?;
//! ```

use crate::error::StreamError;
use crate::job::{JobPriority, StreamDef, StreamJob};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Options for enqueuing a job.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delay before the job becomes visible to consumers.
    pub delay: Option<Duration>,
    /// Priority hint recorded on the stream entry.
    pub priority: Option<JobPriority>,
}

impl EnqueueOptions {
    /// Enqueue immediately with default priority.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Enqueue with a visibility delay.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            priority: None,
        }
    }

    /// Set the priority hint.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Generic stream producer for enqueuing jobs.
///
/// This producer can be used by any service (API, CLI, etc.) to
/// queue jobs for background processing by workers. Delayed jobs are
/// parked in a sorted set scored by due time and promoted into the
/// stream by `DelayedJobMover`.
pub struct StreamProducer {
    redis: Arc<ConnectionManager>,
    stream_name: String,
    delayed_set: String,
    max_length: i64,
}

impl StreamProducer {
    /// Create a new StreamProducer for a specific stream.
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        let delayed_set = format!("{}:delayed", stream_name);
        Self {
            redis: Arc::new(redis),
            stream_name,
            delayed_set,
            max_length: 100_000,
        }
    }

    /// Create a producer from a `StreamDef` implementation.
    ///
    /// This is the recommended way to create a producer as it ensures
    /// the stream name and delayed set are consistent with the worker.
    pub fn from_stream_def<S: StreamDef>(redis: ConnectionManager) -> Self {
        Self {
            redis: Arc::new(redis),
            stream_name: S::STREAM_NAME.to_string(),
            delayed_set: S::DELAYED_SET.to_string(),
            max_length: S::MAX_LENGTH,
        }
    }

    /// Create from an Arc<ConnectionManager> (for sharing connections).
    pub fn from_arc_with_stream_def<S: StreamDef>(redis: Arc<ConnectionManager>) -> Self {
        Self {
            redis,
            stream_name: S::STREAM_NAME.to_string(),
            delayed_set: S::DELAYED_SET.to_string(),
            max_length: S::MAX_LENGTH,
        }
    }

    /// Set the maximum stream length (MAXLEN ~).
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    /// Get the stream name.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Get the delayed set name.
    pub fn delayed_set(&self) -> &str {
        &self.delayed_set
    }

    /// Enqueue a job for immediate visibility.
    ///
    /// Returns the Redis stream message ID.
    pub async fn send<J: StreamJob>(&self, job: &J) -> Result<String, StreamError> {
        self.send_with_options(job, EnqueueOptions::immediate())
            .await
    }

    /// Enqueue a job with delay and priority options.
    ///
    /// Immediate jobs go straight into the stream via XADD. Delayed jobs
    /// are parked in the delayed sorted set scored by due-time millis;
    /// the mover promotes them once due. Returns the stream entry ID for
    /// immediate jobs, or a `delayed:<job_id>` marker for parked ones.
    pub async fn send_with_options<J: StreamJob>(
        &self,
        job: &J,
        options: EnqueueOptions,
    ) -> Result<String, StreamError> {
        match options.delay {
            None => self.xadd(job, options.priority).await,
            Some(delay) => {
                let due_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                let payload = serde_json::to_string(job)?;

                let mut conn = (*self.redis).clone();
                let _: i64 = conn.zadd(&self.delayed_set, payload, due_at).await?;

                debug!(
                    stream = %self.stream_name,
                    job_id = %job.job_id(),
                    due_at_ms = due_at,
                    delay_ms = delay.as_millis() as u64,
                    "Parked delayed job"
                );

                Ok(format!("delayed:{}", job.job_id()))
            }
        }
    }

    async fn xadd<J: StreamJob>(
        &self,
        job: &J,
        priority: Option<JobPriority>,
    ) -> Result<String, StreamError> {
        let mut conn = (*self.redis).clone();

        let job_json = serde_json::to_string(job)?;
        let priority = priority.unwrap_or_else(|| job.priority());

        // XADD with MAXLEN ~ for approximate trimming (more efficient)
        let stream_id: String = redis::cmd("XADD")
            .arg(&self.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg("job") // Field name matches what StreamConsumer expects
            .arg(&job_json)
            .arg("priority")
            .arg(priority.value())
            .query_async(&mut conn)
            .await?;

        debug!(
            stream = %self.stream_name,
            stream_id = %stream_id,
            job_id = %job.job_id(),
            "Enqueued job"
        );

        Ok(stream_id)
    }

    /// Enqueue multiple jobs in a pipeline (batch operation).
    pub async fn send_batch<J: StreamJob>(&self, jobs: &[J]) -> Result<Vec<String>, StreamError> {
        if jobs.is_empty() {
            return Ok(vec![]);
        }

        let mut conn = (*self.redis).clone();
        let mut pipe = redis::pipe();

        for job in jobs {
            let job_json = serde_json::to_string(job)?;
            pipe.cmd("XADD")
                .arg(&self.stream_name)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.max_length)
                .arg("*")
                .arg("job")
                .arg(&job_json)
                .arg("priority")
                .arg(job.priority().value());
        }

        let results: Vec<String> = pipe.query_async(&mut conn).await?;

        debug!(
            stream = %self.stream_name,
            count = results.len(),
            "Enqueued batch of jobs"
        );

        Ok(results)
    }

    /// Get the current stream length.
    pub async fn stream_length(&self) -> Result<i64, StreamError> {
        let mut conn = (*self.redis).clone();
        let len: i64 = conn.xlen(&self.stream_name).await?;
        Ok(len)
    }

    /// Get the number of parked delayed jobs.
    pub async fn delayed_count(&self) -> Result<i64, StreamError> {
        let mut conn = (*self.redis).clone();
        let len: i64 = conn.zcard(&self.delayed_set).await?;
        Ok(len)
    }
}

impl Clone for StreamProducer {
    fn clone(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            stream_name: self.stream_name.clone(),
            delayed_set: self.delayed_set.clone(),
            max_length: self.max_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_options() {
        let opts = EnqueueOptions::immediate();
        assert!(opts.delay.is_none());

        let opts = EnqueueOptions::delayed(Duration::from_secs(120))
            .with_priority(JobPriority::High);
        assert_eq!(opts.delay, Some(Duration::from_secs(120)));
        assert_eq!(opts.priority, Some(JobPriority::High));
    }
}
