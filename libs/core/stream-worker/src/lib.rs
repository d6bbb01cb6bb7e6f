//! Stream Worker Framework
//!
//! A generic Redis Streams worker framework for processing background jobs.
//!
//! ## Features
//!
//! - **Generic worker**: `StreamWorker<J, P>` processes any job type
//! - **Consumer groups**: Horizontal scaling with Redis consumer groups
//! - **Delayed jobs**: Sorted-set parking lot with a mover task that promotes
//!   due jobs into the stream (queue-native delay support)
//! - **At-least-once delivery**: unacked entries are redelivered; stale
//!   pending entries are claimed from dead consumers
//!
//! ## Example
//!
//! ```ignore
//! use stream_worker::{StreamWorker, StreamJob, StreamProcessor, StreamDef, WorkerConfig};
//!
//! // Define your job type
//! #[derive(Clone, Serialize, Deserialize)]
//! struct MyJob { /* ... */ }
//!
//! impl StreamJob for MyJob { /* ... */ }
//!
//! // Define your stream
//! struct MyStream;
//! impl StreamDef for MyStream {
//!     const STREAM_NAME: &'static str = "my:jobs";
//!     const CONSUMER_GROUP: &'static str = "my_workers";
//!     const DELAYED_SET: &'static str = "my:jobs:delayed";
//! }
//!
//! // Create processor and run
//! let config = WorkerConfig::from_stream_def::<MyStream>();
//! let worker = StreamWorker::new(redis, processor, config);
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod error;
mod event;
mod job;
mod processor;
mod producer;
mod scheduler;
mod worker;

// Re-export main types
pub use config::WorkerConfig;
pub use consumer::{StreamConsumer, StreamInfo};
pub use error::{ErrorCategory, StreamError};
pub use event::StreamEvent;
pub use job::{JobPriority, StreamDef, StreamJob};
pub use processor::{FailingProcessor, NoOpProcessor, StreamProcessor};
pub use producer::{EnqueueOptions, StreamProducer};
pub use scheduler::DelayedJobMover;
pub use worker::StreamWorker;
