//! Error types for the delivery service surface.

use thiserror::Error;

/// Result type for delivery-service operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors surfaced to callers of [`crate::DeliveryService`].
///
/// Processor-side failures travel as `stream_worker::StreamError` so
/// the worker can categorize them; this type is the caller-facing edge.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Queue operation failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<stream_worker::StreamError> for DeliveryError {
    fn from(err: stream_worker::StreamError) -> Self {
        Self::Queue(err.to_string())
    }
}
