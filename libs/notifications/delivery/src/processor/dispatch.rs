//! Immediate ("send now") path.

use super::{classify_send_error, map_render_error, map_store_error, DeliveryProcessor};
use crate::backoff;
use crate::job::{EmailJob, ImmediateJob};
use crate::log::NewDeliveryLog;
use stream_worker::{EnqueueOptions, ErrorCategory, StreamError};
use tracing::{debug, warn};

impl DeliveryProcessor {
    /// Create the delivery log, render, send once. A transport failure
    /// does not fail the job: the log stays pending and the first retry
    /// job is enqueued with backoff.
    pub(crate) async fn process_immediate(&self, job: &ImmediateJob) -> Result<(), StreamError> {
        let log = self
            .store()
            .create(NewDeliveryLog::from_immediate(job))
            .await
            .map_err(map_store_error)?;

        // Redelivered entry after the attempt chain already settled
        if log.status.is_terminal() {
            debug!(
                delivery_log_id = %log.id,
                status = %log.status,
                "Immediate job redelivered after settlement, skipping"
            );
            return Ok(());
        }

        let rendered = match self.renderer().render(&job.content, &job.context) {
            Ok(rendered) => rendered,
            Err(e) => {
                self.store()
                    .mark_failed(log.id, &e.to_string())
                    .await
                    .map_err(map_store_error)?;
                return Err(map_render_error(&e));
            }
        };

        self.store()
            .set_subject(log.id, &rendered.subject)
            .await
            .map_err(map_store_error)?;

        let email = self.build_email(&job.recipient, &rendered, job.priority.clone());

        match self.provider().send(&email).await {
            Ok(result) => self.finalize_sent(log.id, &job.recipient, &result.message_id).await,
            Err(e) => {
                let error = classify_send_error(e);
                match error.category() {
                    ErrorCategory::Permanent => {
                        self.store()
                            .mark_failed(log.id, &error.to_string())
                            .await
                            .map_err(map_store_error)?;
                        Err(error)
                    }
                    ErrorCategory::Transient | ErrorCategory::RateLimited => {
                        // Log stays pending; the retry chain owns the
                        // attempt counter from here.
                        let retry = EmailJob::first_retry(job, log.id);
                        let delay = backoff::retry_delay(0);
                        self.queue()
                            .enqueue(&retry, EnqueueOptions::delayed(delay))
                            .await?;

                        warn!(
                            delivery_log_id = %log.id,
                            to = %job.recipient,
                            delay_secs = delay.as_secs(),
                            error = %error,
                            "Transport failed, first retry scheduled"
                        );
                        Ok(())
                    }
                }
            }
        }
    }
}
