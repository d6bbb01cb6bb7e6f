//! Job and stream definition traits.
//!
//! This module provides:
//! - `StreamJob` trait for job payloads
//! - `JobPriority` for backend-level ordering hints
//! - `StreamDef` trait for domain-specific stream definitions

use serde::{de::DeserializeOwned, Serialize};

/// Trait for stream job payloads.
///
/// Domain models that represent jobs in a stream should implement this trait.
/// It provides the methods the worker needs to track and log jobs.
///
/// # Example
///
/// ```rust,ignore
/// use stream_worker::StreamJob;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct EmailJob {
///     id: Uuid,
///     to_email: String,
///     subject: String,
/// }
///
/// impl StreamJob for EmailJob {
///     fn job_id(&self) -> String {
///         self.id.to_string()
///     }
/// }
/// ```
pub trait StreamJob: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Get the unique job ID.
    ///
    /// This should be a stable identifier that doesn't change across
    /// redeliveries of the same queue entry.
    fn job_id(&self) -> String;

    /// Get the job priority (default: Normal).
    ///
    /// Higher priority jobs may be processed first, depending on the backend.
    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    /// Get the job type name (for logging).
    ///
    /// Default implementation uses the Rust type name.
    fn job_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Job priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum JobPriority {
    /// Low priority - processed last
    Low,
    /// Normal priority (default)
    #[default]
    Normal,
    /// High priority - processed first
    High,
}

impl JobPriority {
    /// Get the numeric priority value (higher = more important).
    pub fn value(&self) -> u8 {
        match self {
            JobPriority::Low => 0,
            JobPriority::Normal => 1,
            JobPriority::High => 2,
        }
    }
}

/// Stream definition trait.
///
/// Each domain implements this trait to define their stream configuration.
/// This enables type-safe stream configuration and consistent naming
/// conventions.
///
/// # Example
///
/// ```rust,ignore
/// use stream_worker::StreamDef;
///
/// pub struct EmailStream;
///
/// impl StreamDef for EmailStream {
///     const STREAM_NAME: &'static str = "email:jobs";
///     const CONSUMER_GROUP: &'static str = "email_workers";
///     const DELAYED_SET: &'static str = "email:jobs:delayed";
/// }
/// ```
pub trait StreamDef: Send + Sync {
    /// The Redis stream name (e.g., "email:jobs").
    const STREAM_NAME: &'static str;

    /// The consumer group name for this stream.
    const CONSUMER_GROUP: &'static str;

    /// The sorted set holding delayed jobs until they are due.
    const DELAYED_SET: &'static str;

    /// Maximum stream length before auto-trim (MAXLEN).
    /// Default: 100,000 entries.
    const MAX_LENGTH: i64 = 100_000;

    /// Get the stream name.
    fn stream_name() -> &'static str {
        Self::STREAM_NAME
    }

    /// Get the consumer group name.
    fn consumer_group() -> &'static str {
        Self::CONSUMER_GROUP
    }

    /// Get the delayed set name.
    fn delayed_set() -> &'static str {
        Self::DELAYED_SET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct TestJob {
        id: String,
    }

    impl StreamJob for TestJob {
        fn job_id(&self) -> String {
            self.id.clone()
        }
    }

    struct TestStream;
    impl StreamDef for TestStream {
        const STREAM_NAME: &'static str = "test:stream";
        const CONSUMER_GROUP: &'static str = "test_workers";
        const DELAYED_SET: &'static str = "test:stream:delayed";
    }

    #[test]
    fn test_job_defaults() {
        let job = TestJob {
            id: "job-1".to_string(),
        };
        assert_eq!(job.job_id(), "job-1");
        assert_eq!(job.priority(), JobPriority::Normal);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Low < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::High);
        assert_eq!(JobPriority::High.value(), 2);
    }

    #[test]
    fn test_stream_def() {
        assert_eq!(TestStream::stream_name(), "test:stream");
        assert_eq!(TestStream::consumer_group(), "test_workers");
        assert_eq!(TestStream::delayed_set(), "test:stream:delayed");
        assert_eq!(TestStream::MAX_LENGTH, 100_000);
    }
}
