//! Email delivery engine.
//!
//! Turns a logical "send this email" intent into a durable, retried,
//! idempotent, policy-gated delivery attempt, including recurring
//! schedules. Jobs flow through a Redis stream (see `stream-worker`);
//! the delivery log is the durable state machine that makes
//! at-least-once queue delivery safe against duplicate sends.
//!
//! # Architecture
//!
//! ```text
//! DeliveryService --> JobQueue (Redis stream + delayed set)
//!                          |
//!                    DeliveryProcessor
//!                    /     |        \
//!             dispatch   retry   scheduled
//!                    \     |        /
//!              DeliveryLogStore  (Pending -> Sent | Failed)
//!                    renderer / provider / preference gate
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use email_delivery::{
//!     DeliveryProcessor, EmailStream, MockSmtpProvider, TemplateEngine,
//! };
//! use stream_worker::{StreamWorker, WorkerConfig};
//!
//! let processor = DeliveryProcessor::new(store, renderer, provider, gate, queue);
//! let config = WorkerConfig::from_stream_def::<EmailStream>();
//! let worker = StreamWorker::new(redis, processor, config);
//! worker.run(shutdown_rx).await?;
//! ```

pub mod backoff;
pub mod error;
pub mod job;
pub mod log;
pub mod models;
pub mod preferences;
pub mod processor;
pub mod provider;
pub mod queue;
pub mod recurrence;
pub mod service;
pub mod streams;
pub mod templates;

pub use error::{DeliveryError, DeliveryResult};
pub use job::{
    EmailContent, EmailJob, ImmediateJob, RecurrencePattern, RecurrenceRule, RetryJob,
    ScheduleType, ScheduledJob, Weekday,
};
pub use log::{
    DeliveryLog, DeliveryLogStore, DeliveryStatus, InMemoryDeliveryLogStore, NewDeliveryLog,
    RedisDeliveryLogStore, StoreError, TransitionOutcome,
};
pub use models::{Email, EmailPriority};
pub use preferences::{AllowAllGate, BlockReason, GateCheck, PreferenceGate, StaticGate};
pub use processor::DeliveryProcessor;
pub use provider::{EmailProvider, MockSmtpProvider, SendResult, SmtpConfig, SmtpProvider};
pub use queue::{JobQueue, QueuedJob, RecordingQueue};
pub use service::{DeliveryService, DeliveryServiceConfig};
pub use streams::EmailStream;
pub use templates::{EmailTemplate, RenderError, RenderedEmail, TemplateEngine, TemplateRenderer};
