//! Worker configuration
//!
//! This module provides `WorkerConfig` for configuring the stream worker.

use crate::job::StreamDef;
use uuid::Uuid;

/// Configuration for the stream worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis stream name
    pub stream_name: String,

    /// Consumer group name
    pub consumer_group: String,

    /// Unique consumer ID (auto-generated if not provided)
    pub consumer_id: String,

    /// Sorted set holding delayed jobs
    pub delayed_set: String,

    /// Maximum stream length before trimming
    pub max_length: i64,

    /// Batch size for reading messages
    pub batch_size: usize,

    /// Blocking read timeout in milliseconds (None = non-blocking)
    pub block_timeout_ms: Option<u64>,

    /// Idle time in milliseconds before a pending entry from another
    /// consumer is considered abandoned and claimed
    pub claim_idle_ms: u64,

    /// How often the delayed-job mover promotes due jobs, in milliseconds
    pub mover_interval_ms: u64,
}

impl WorkerConfig {
    /// Create a new WorkerConfig from a StreamDef
    pub fn from_stream_def<S: StreamDef>() -> Self {
        Self {
            stream_name: S::STREAM_NAME.to_string(),
            consumer_group: S::CONSUMER_GROUP.to_string(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            delayed_set: S::DELAYED_SET.to_string(),
            max_length: S::MAX_LENGTH,
            batch_size: 10,
            block_timeout_ms: Some(5000),
            claim_idle_ms: 30_000,
            mover_interval_ms: 1000,
        }
    }

    /// Create a new WorkerConfig with explicit values
    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        let delayed_set = format!("{}:delayed", stream_name);
        Self {
            stream_name,
            consumer_group: consumer_group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            delayed_set,
            max_length: 100_000,
            batch_size: 10,
            block_timeout_ms: Some(5000),
            claim_idle_ms: 30_000,
            mover_interval_ms: 1000,
        }
    }

    /// Set the consumer ID
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the maximum stream length
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the blocking timeout (None for non-blocking)
    pub fn with_blocking(mut self, timeout_ms: Option<u64>) -> Self {
        self.block_timeout_ms = timeout_ms;
        self
    }

    /// Set the claim idle threshold for abandoned messages
    pub fn with_claim_idle_ms(mut self, idle_ms: u64) -> Self {
        self.claim_idle_ms = idle_ms;
        self
    }

    /// Set the delayed-job mover interval
    pub fn with_mover_interval_ms(mut self, interval_ms: u64) -> Self {
        self.mover_interval_ms = interval_ms;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("stream:jobs", "workers")
    }
}
