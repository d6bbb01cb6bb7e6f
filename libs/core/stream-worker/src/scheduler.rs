//! Delayed-job mover
//!
//! Promotes due jobs from the delayed sorted set into the stream.
//! Producers park delayed jobs with `ZADD delayed_set <due_ms> <payload>`;
//! this task periodically moves everything with a score <= now into the
//! stream with XADD and removes it from the set.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Moves due delayed jobs into the stream.
///
/// Safe to run on every worker instance: ZREM returns whether this
/// instance actually removed the member, so a job promoted concurrently
/// by two movers is only XADDed once.
pub struct DelayedJobMover {
    redis: Arc<ConnectionManager>,
    config: WorkerConfig,
}

impl DelayedJobMover {
    /// Create a new mover for a stream.
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self {
            redis: Arc::new(redis),
            config,
        }
    }

    /// Promote all currently due jobs. Returns the number promoted.
    pub async fn promote_due(&self) -> Result<usize, StreamError> {
        let mut conn = (*self.redis).clone();
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.config.delayed_set)
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        let mut promoted = 0usize;
        for payload in due {
            // Claim the member first; only the instance that removed it
            // gets to enqueue it.
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.config.delayed_set)
                .arg(&payload)
                .query_async(&mut conn)
                .await?;

            if removed == 0 {
                continue;
            }

            let stream_id: String = redis::cmd("XADD")
                .arg(&self.config.stream_name)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.config.max_length)
                .arg("*")
                .arg("job")
                .arg(&payload)
                .query_async(&mut conn)
                .await?;

            debug!(
                stream = %self.config.stream_name,
                stream_id = %stream_id,
                "Promoted delayed job"
            );
            promoted += 1;
        }

        Ok(promoted)
    }

    /// Run the mover loop until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            stream = %self.config.stream_name,
            delayed_set = %self.config.delayed_set,
            interval_ms = self.config.mover_interval_ms,
            "Starting delayed-job mover"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.mover_interval_ms));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.promote_due().await {
                        Ok(n) if n > 0 => {
                            debug!(count = n, "Promoted due jobs");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Failed to promote delayed jobs");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Delayed-job mover stopping");
                        return Ok(());
                    }
                }
            }
        }
    }
}
