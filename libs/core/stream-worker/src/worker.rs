//! Generic stream worker.
//!
//! Runs the read → process → ack loop against a Redis stream consumer
//! group. Delivery semantics are at-least-once: entries are only
//! acknowledged after the processor returns, and entries left pending by
//! a crashed worker are claimed back after an idle threshold.

use crate::config::WorkerConfig;
use crate::consumer::StreamConsumer;
use crate::error::{ErrorCategory, StreamError};
use crate::event::StreamEvent;
use crate::job::StreamJob;
use crate::processor::StreamProcessor;
use redis::aio::ConnectionManager;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Generic stream worker that processes jobs using a processor.
///
/// # Type Parameters
///
/// * `J` - The job type (must implement `StreamJob`)
/// * `P` - The processor type (must implement `StreamProcessor<J>`)
///
/// # Failure semantics
///
/// - `Ok` → entry acknowledged.
/// - `Permanent` error → entry acknowledged and dropped. The processor is
///   responsible for recording the failure durably before returning it.
/// - `Transient`/`RateLimited` error → entry left pending; it will be
///   redelivered to this consumer on restart or claimed by another one.
pub struct StreamWorker<J, P>
where
    J: StreamJob,
    P: StreamProcessor<J>,
{
    consumer: StreamConsumer,
    processor: Arc<P>,
    config: WorkerConfig,
    _phantom: PhantomData<J>,
}

impl<J, P> StreamWorker<J, P>
where
    J: StreamJob,
    P: StreamProcessor<J> + 'static,
{
    /// Create a new stream worker.
    pub fn new(redis: ConnectionManager, processor: P, config: WorkerConfig) -> Self {
        let consumer = StreamConsumer::new(Arc::new(redis), config.clone());
        Self {
            consumer,
            processor: Arc::new(processor),
            config,
            _phantom: PhantomData,
        }
    }

    /// Create a new stream worker with an Arc processor.
    pub fn with_arc_processor(
        redis: ConnectionManager,
        processor: Arc<P>,
        config: WorkerConfig,
    ) -> Self {
        let consumer = StreamConsumer::new(Arc::new(redis), config.clone());
        Self {
            consumer,
            processor,
            config,
            _phantom: PhantomData,
        }
    }

    /// Get a reference to the consumer for health checks.
    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    /// Run the worker loop.
    ///
    /// Continuously reads jobs from the stream and processes them.
    /// Use the shutdown receiver to gracefully stop the worker.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            consumer_id = %self.config.consumer_id,
            stream = %self.config.stream_name,
            group = %self.config.consumer_group,
            processor = %self.processor.name(),
            "Starting stream worker"
        );

        self.consumer.init_consumer_group().await?;

        // Drain entries this consumer left pending before a restart
        let pending: Vec<StreamEvent<J>> =
            self.consumer.read_pending(self.config.batch_size).await?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Reprocessing pending entries");
            for event in &pending {
                self.handle_event(event).await;
            }
        }

        let claim_interval = Duration::from_millis(self.config.claim_idle_ms * 2);
        let mut last_claim = std::time::Instant::now();

        // Consecutive connection errors drive an exponential pause
        let mut consecutive_errors: u32 = 0;
        const MAX_BACKOFF_SECS: u64 = 30;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            match self.consumer.read_new::<J>(self.config.batch_size).await {
                Ok(events) => {
                    if consecutive_errors > 0 {
                        info!(errors = consecutive_errors, "Connection recovered");
                        consecutive_errors = 0;
                    }
                    for event in &events {
                        self.handle_event(event).await;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff_secs =
                        std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                    warn!(
                        error = %e,
                        consecutive_errors,
                        backoff_secs,
                        "Error reading from stream, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    continue;
                }
            }

            // Periodically claim entries abandoned by dead consumers
            if last_claim.elapsed() >= claim_interval {
                match self.consumer.claim_abandoned::<J>(self.config.batch_size).await {
                    Ok(claimed) => {
                        for event in &claimed {
                            self.handle_event(event).await;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Error claiming abandoned messages");
                    }
                }
                last_claim = std::time::Instant::now();
            }
        }

        Ok(())
    }

    /// Process one event and acknowledge it according to the outcome.
    async fn handle_event(&self, event: &StreamEvent<J>) {
        debug!(
            stream_id = %event.stream_id,
            job_id = %event.job_id(),
            delivery_count = event.delivery_count,
            "Processing event"
        );

        match self.processor.process(event).await {
            Ok(()) => {
                if let Err(e) = self.consumer.ack(&event.stream_id).await {
                    warn!(stream_id = %event.stream_id, error = %e, "Failed to ack");
                }
            }
            Err(e) => match e.category() {
                ErrorCategory::Permanent => {
                    // The processor has recorded the failure; dropping the
                    // entry prevents a redelivery loop on a hopeless job.
                    error!(
                        stream_id = %event.stream_id,
                        job_id = %event.job_id(),
                        error = %e,
                        "Permanent failure, dropping entry"
                    );
                    if let Err(ack_err) = self.consumer.ack(&event.stream_id).await {
                        warn!(stream_id = %event.stream_id, error = %ack_err, "Failed to ack");
                    }
                }
                ErrorCategory::Transient | ErrorCategory::RateLimited => {
                    // Leave unacked; the entry stays pending and will be
                    // redelivered or claimed.
                    warn!(
                        stream_id = %event.stream_id,
                        job_id = %event.job_id(),
                        error = %e,
                        "Transient failure, leaving entry pending"
                    );
                }
            },
        }
    }
}
