//! DeliveryProcessor - executes email jobs from the stream.
//!
//! One processor handles all three job kinds, dispatched exhaustively
//! on the `EmailJob` union:
//! - immediate sends ([`dispatch`])
//! - backoff retries ([`retry`])
//! - scheduled/recurring sends ([`scheduled`])
//!
//! The processor never trusts the queue for idempotency; the delivery
//! log is authoritative. Every path re-reads the log and no-ops when
//! the row is already settled.

mod dispatch;
mod retry;
mod scheduled;

use crate::job::EmailJob;
use crate::log::{DeliveryLogStore, StoreError, TransitionOutcome};
use crate::models::{Email, EmailPriority};
use crate::preferences::PreferenceGate;
use crate::provider::EmailProvider;
use crate::queue::JobQueue;
use crate::templates::{RenderError, RenderedEmail, TemplateRenderer};
use async_trait::async_trait;
use std::sync::Arc;
use stream_worker::{StreamError, StreamEvent, StreamProcessor};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Processor wiring: the durable log plus the four collaborator seams.
pub struct DeliveryProcessor {
    store: Arc<dyn DeliveryLogStore>,
    renderer: Arc<dyn TemplateRenderer>,
    provider: Arc<dyn EmailProvider>,
    gate: Arc<dyn PreferenceGate>,
    queue: Arc<dyn JobQueue>,
    from_email: String,
    from_name: String,
}

impl DeliveryProcessor {
    pub fn new(
        store: Arc<dyn DeliveryLogStore>,
        renderer: Arc<dyn TemplateRenderer>,
        provider: Arc<dyn EmailProvider>,
        gate: Arc<dyn PreferenceGate>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            renderer,
            provider,
            gate,
            queue,
            from_email: std::env::var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "noreply@example.com".to_string()),
            from_name: std::env::var("EMAIL_FROM_NAME")
                .unwrap_or_else(|_| "Notifications".to_string()),
        }
    }

    /// Set an explicit from address
    pub fn with_from(mut self, email: impl Into<String>, name: impl Into<String>) -> Self {
        self.from_email = email.into();
        self.from_name = name.into();
        self
    }

    pub(crate) fn store(&self) -> &dyn DeliveryLogStore {
        self.store.as_ref()
    }

    pub(crate) fn renderer(&self) -> &dyn TemplateRenderer {
        self.renderer.as_ref()
    }

    pub(crate) fn provider(&self) -> &dyn EmailProvider {
        self.provider.as_ref()
    }

    pub(crate) fn gate(&self) -> &dyn PreferenceGate {
        self.gate.as_ref()
    }

    pub(crate) fn queue(&self) -> &dyn JobQueue {
        self.queue.as_ref()
    }

    /// Assemble the transport-ready email from rendered content.
    pub(crate) fn build_email(
        &self,
        recipient: &str,
        rendered: &RenderedEmail,
        priority: EmailPriority,
    ) -> Email {
        let mut email = Email::new(recipient, rendered.subject.clone()).with_priority(priority);
        email.from = Some(format!("{} <{}>", self.from_name, self.from_email));
        email.body_text = rendered.body_text.clone();
        email.body_html = rendered.body_html.clone();
        email
    }

    /// Record a successful send, tolerating a concurrent winner.
    pub(crate) async fn finalize_sent(
        &self,
        log_id: Uuid,
        recipient: &str,
        provider_message_id: &str,
    ) -> Result<(), StreamError> {
        match self
            .store
            .mark_sent(log_id, provider_message_id)
            .await
            .map_err(map_store_error)?
        {
            TransitionOutcome::Applied => {
                info!(
                    delivery_log_id = %log_id,
                    to = %recipient,
                    provider_message_id = %provider_message_id,
                    "Email sent"
                );
            }
            TransitionOutcome::AlreadyTerminal(status) => {
                // Lost the race to another worker; the send happened,
                // the other row state stands.
                info!(
                    delivery_log_id = %log_id,
                    status = %status,
                    "Send finished but log was already settled"
                );
            }
            TransitionOutcome::NotFound => {
                warn!(delivery_log_id = %log_id, "Delivery log vanished before mark_sent");
            }
        }
        Ok(())
    }
}

/// Classify a transport failure by its message, the way providers
/// surface them: rate limiting backs off longer, address/content
/// rejections never retry, everything else is assumed transient.
pub(crate) fn classify_send_error(error: eyre::Report) -> StreamError {
    let msg = error.to_string();
    let lowered = msg.to_lowercase();
    if lowered.contains("rate limit") || lowered.contains("429") {
        StreamError::rate_limited(msg)
    } else if lowered.contains("invalid") || lowered.contains("malformed") {
        StreamError::permanent(msg)
    } else {
        StreamError::transient(msg)
    }
}

pub(crate) fn map_store_error(error: StoreError) -> StreamError {
    match error {
        // Connectivity: redeliver and try again
        StoreError::Redis(e) => StreamError::transient(format!("delivery log store: {}", e)),
        // A corrupt row cannot improve on redelivery
        StoreError::Corrupt { .. } => StreamError::permanent(error.to_string()),
    }
}

pub(crate) fn map_render_error(error: &RenderError) -> StreamError {
    StreamError::permanent(error.to_string())
}

#[async_trait]
impl StreamProcessor<EmailJob> for DeliveryProcessor {
    async fn process(&self, event: &StreamEvent<EmailJob>) -> Result<(), StreamError> {
        debug!(
            stream_id = %event.stream_id,
            job_id = %event.job_id(),
            delivery_count = event.delivery_count,
            "Processing email job"
        );

        match &event.job {
            EmailJob::Immediate(job) => self.process_immediate(job).await,
            EmailJob::Retry(job) => self.process_retry(job).await,
            EmailJob::Scheduled(job) => self.process_scheduled(job).await,
        }
    }

    fn name(&self) -> &'static str {
        "delivery_processor"
    }

    async fn health_check(&self) -> Result<bool, StreamError> {
        self.provider
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| StreamError::transient(e.to_string()))
    }
}
