//! Processor trait for job execution.

use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::job::StreamJob;
use async_trait::async_trait;

/// Job processor trait.
///
/// Implement this trait to define how jobs are processed. The processor
/// receives the full `StreamEvent` so it can inspect delivery metadata
/// (redeliveries in particular).
///
/// # Error Handling
///
/// Return a `StreamError` with the appropriate category:
/// - `Transient`: the entry stays pending and will be redelivered
/// - `Permanent`: the entry is acknowledged and dropped; the processor is
///   expected to have recorded the failure somewhere durable first
/// - `RateLimited`: treated like transient, but workers back off longer
#[async_trait]
pub trait StreamProcessor<J: StreamJob>: Send + Sync {
    /// Process a single job event.
    async fn process(&self, event: &StreamEvent<J>) -> Result<(), StreamError>;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;

    /// Health check for the processor.
    ///
    /// Override this to add custom health checks (e.g., checking external
    /// services). Default: always returns Ok(true).
    async fn health_check(&self) -> Result<bool, StreamError> {
        Ok(true)
    }
}

/// A no-op processor for testing.
#[derive(Debug, Clone, Default)]
pub struct NoOpProcessor;

#[async_trait]
impl<J: StreamJob> StreamProcessor<J> for NoOpProcessor {
    async fn process(&self, _event: &StreamEvent<J>) -> Result<(), StreamError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop_processor"
    }
}

/// A processor that always fails (for testing).
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    error_message: String,
    transient: bool,
}

impl FailingProcessor {
    /// Create a processor that fails with transient errors.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            transient: true,
        }
    }

    /// Create a processor that fails with permanent errors.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            transient: false,
        }
    }
}

#[async_trait]
impl<J: StreamJob> StreamProcessor<J> for FailingProcessor {
    async fn process(&self, _event: &StreamEvent<J>) -> Result<(), StreamError> {
        if self.transient {
            Err(StreamError::transient(&self.error_message))
        } else {
            Err(StreamError::permanent(&self.error_message))
        }
    }

    fn name(&self) -> &'static str {
        "failing_processor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
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

    fn event() -> StreamEvent<TestJob> {
        StreamEvent::new(
            "1234567890123-0".to_string(),
            TestJob {
                id: "test".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_noop_processor() {
        let processor = NoOpProcessor;
        let result = StreamProcessor::<TestJob>::process(&processor, &event()).await;
        assert!(result.is_ok());
        assert_eq!(StreamProcessor::<TestJob>::name(&processor), "noop_processor");
    }

    #[tokio::test]
    async fn test_failing_processor_transient() {
        let processor = FailingProcessor::transient("test failure");
        let result = StreamProcessor::<TestJob>::process(&processor, &event()).await;
        assert_eq!(result.unwrap_err().category(), ErrorCategory::Transient);
    }

    #[tokio::test]
    async fn test_failing_processor_permanent() {
        let processor = FailingProcessor::permanent("test failure");
        let result = StreamProcessor::<TestJob>::process(&processor, &event()).await;
        assert_eq!(result.unwrap_err().category(), ErrorCategory::Permanent);
    }
}
