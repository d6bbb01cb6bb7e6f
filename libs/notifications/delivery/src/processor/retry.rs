//! Retry path: re-attempt a failed immediate send with backoff.

use super::{classify_send_error, map_render_error, map_store_error, DeliveryProcessor};
use crate::backoff;
use crate::job::{EmailJob, RetryJob};
use crate::log::DeliveryStatus;
use stream_worker::{EnqueueOptions, ErrorCategory, StreamError};
use tracing::{debug, warn};

impl DeliveryProcessor {
    /// Idempotency check, budget check, then one more transport call.
    ///
    /// The log's `retry_count` counts attempts actually processed; it
    /// is incremented here, once per retry job, before the send.
    pub(crate) async fn process_retry(&self, job: &RetryJob) -> Result<(), StreamError> {
        let Some(log) = self
            .store()
            .get(job.delivery_log_id)
            .await
            .map_err(map_store_error)?
        else {
            warn!(
                delivery_log_id = %job.delivery_log_id,
                attempt = job.attempt_number,
                "Delivery log not found for retry job, dropping"
            );
            return Ok(());
        };

        match log.status {
            DeliveryStatus::Sent => {
                debug!(
                    delivery_log_id = %log.id,
                    "Already sent, skipping duplicate retry delivery"
                );
                return Ok(());
            }
            DeliveryStatus::Failed => {
                debug!(delivery_log_id = %log.id, "Already failed, nothing to retry");
                return Ok(());
            }
            DeliveryStatus::Pending => {}
        }

        if log.retry_count >= log.max_retries {
            self.store()
                .mark_failed(log.id, "max retries exceeded")
                .await
                .map_err(map_store_error)?;
            warn!(
                delivery_log_id = %log.id,
                retry_count = log.retry_count,
                max_retries = log.max_retries,
                "Retry budget exhausted, marking failed"
            );
            return Ok(());
        }

        // Atomic increment; None means another worker settled the row
        // in between, and this delivery has nothing left to do.
        let Some(log) = self
            .store()
            .record_attempt(log.id)
            .await
            .map_err(map_store_error)?
        else {
            debug!(delivery_log_id = %job.delivery_log_id, "Attempt lost the race, skipping");
            return Ok(());
        };

        let payload = &job.original_payload;

        // Re-render rather than reuse: templates may have changed since
        // the first attempt.
        let rendered = match self.renderer().render(&payload.content, &payload.context) {
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

        let email = self.build_email(&payload.recipient, &rendered, payload.priority.clone());

        match self.provider().send(&email).await {
            Ok(result) => {
                self.finalize_sent(log.id, &payload.recipient, &result.message_id)
                    .await
            }
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
                        if job.attempt_number < log.max_retries {
                            let next = EmailJob::Retry(job.next_attempt());
                            let delay = backoff::retry_delay(job.attempt_number);
                            self.queue()
                                .enqueue(&next, EnqueueOptions::delayed(delay))
                                .await?;

                            warn!(
                                delivery_log_id = %log.id,
                                attempt = job.attempt_number,
                                next_attempt = job.attempt_number + 1,
                                delay_secs = delay.as_secs(),
                                error = %error,
                                "Retry failed, next attempt scheduled"
                            );
                        } else {
                            self.store()
                                .mark_failed(log.id, &error.to_string())
                                .await
                                .map_err(map_store_error)?;
                            warn!(
                                delivery_log_id = %log.id,
                                attempt = job.attempt_number,
                                error = %error,
                                "Final retry failed, marking failed"
                            );
                        }
                        Ok(())
                    }
                }
            }
        }
    }
}
