//! Scheduled path: policy gate, one-shot dispatch, recurrence.

use super::{classify_send_error, map_store_error, DeliveryProcessor};
use crate::job::{EmailJob, ScheduleType, ScheduledJob};
use crate::log::NewDeliveryLog;
use crate::preferences::BlockReason;
use crate::recurrence;
use chrono::Utc;
use std::time::Duration;
use stream_worker::{EnqueueOptions, StreamError};
use tracing::{debug, info, warn};

/// Floor on the quiet-hours reschedule delay. A gate reporting quiet
/// hours with a `next_allowed_time` at or before now would otherwise
/// bounce the occurrence through the queue with zero delay.
const MIN_QUIET_HOURS_DELAY: Duration = Duration::from_secs(60);

impl DeliveryProcessor {
    /// Gate, send, then advance the recurrence.
    ///
    /// Policy blocks are deliberate non-sends, not failures: they skip
    /// the occurrence (or cancel the schedule, for unsubscribe with
    /// `cancel_on_unsubscribe`) but a recurring schedule still advances.
    /// A send failure is terminal for the occurrence; it does not feed
    /// the retry chain.
    pub(crate) async fn process_scheduled(&self, job: &ScheduledJob) -> Result<(), StreamError> {
        let check = self
            .gate()
            .is_allowed(&job.recipient, &job.categories)
            .await
            .map_err(|e| StreamError::transient(e.to_string()))?;

        if !check.allowed {
            match check.reason {
                Some(BlockReason::Unsubscribed) => {
                    if job.cancel_on_unsubscribe && job.schedule_type == ScheduleType::Recurring {
                        info!(
                            schedule_id = %job.schedule_id,
                            to = %job.recipient,
                            "Recipient unsubscribed, cancelling schedule"
                        );
                        return Ok(());
                    }
                    info!(
                        schedule_id = %job.schedule_id,
                        to = %job.recipient,
                        "Recipient unsubscribed, skipping occurrence"
                    );
                }
                Some(BlockReason::CategoryDisabled) | None => {
                    info!(
                        schedule_id = %job.schedule_id,
                        to = %job.recipient,
                        "Category disabled for recipient, skipping occurrence"
                    );
                }
            }
            return self.enqueue_next_occurrence(job).await;
        }

        if self
            .gate()
            .is_quiet_hours(&job.recipient)
            .await
            .map_err(|e| StreamError::transient(e.to_string()))?
        {
            let resume_at = self
                .gate()
                .next_allowed_time(&job.recipient)
                .await
                .map_err(|e| StreamError::transient(e.to_string()))?;

            // Reschedule, not a retry and not a failure: the identical
            // job (same occurrence id) runs again once quiet hours end.
            let delay = (resume_at - Utc::now())
                .to_std()
                .unwrap_or_default()
                .max(MIN_QUIET_HOURS_DELAY);
            self.queue()
                .enqueue(&EmailJob::Scheduled(job.clone()), EnqueueOptions::delayed(delay))
                .await?;

            info!(
                schedule_id = %job.schedule_id,
                to = %job.recipient,
                resume_at = %resume_at,
                "Quiet hours, rescheduled occurrence"
            );
            return Ok(());
        }

        if job.skip_if_unread
            && self
                .gate()
                .has_unread_emails(&job.recipient)
                .await
                .map_err(|e| StreamError::transient(e.to_string()))?
        {
            info!(
                schedule_id = %job.schedule_id,
                to = %job.recipient,
                "Recipient has unread mail, skipping occurrence"
            );
            return self.enqueue_next_occurrence(job).await;
        }

        self.dispatch_occurrence(job).await?;
        self.enqueue_next_occurrence(job).await
    }

    /// One-shot send for this occurrence; outcome lands on the log.
    async fn dispatch_occurrence(&self, job: &ScheduledJob) -> Result<(), StreamError> {
        let log = self
            .store()
            .create(NewDeliveryLog::from_scheduled(job))
            .await
            .map_err(map_store_error)?;

        if log.status.is_terminal() {
            debug!(
                delivery_log_id = %log.id,
                status = %log.status,
                "Occurrence redelivered after settlement, skipping send"
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
                warn!(
                    delivery_log_id = %log.id,
                    schedule_id = %job.schedule_id,
                    error = %e,
                    "Scheduled render failed, occurrence marked failed"
                );
                return Ok(());
            }
        };

        self.store()
            .set_subject(log.id, &rendered.subject)
            .await
            .map_err(map_store_error)?;

        let email = self.build_email(&job.recipient, &rendered, job.priority.clone());

        match self.provider().send(&email).await {
            Ok(result) => {
                self.finalize_sent(log.id, &job.recipient, &result.message_id)
                    .await
            }
            Err(e) => {
                // Terminal for this occurrence regardless of category;
                // the next occurrence still gets its own chance.
                let error = classify_send_error(e);
                self.store()
                    .mark_failed(log.id, &error.to_string())
                    .await
                    .map_err(map_store_error)?;
                warn!(
                    delivery_log_id = %log.id,
                    schedule_id = %job.schedule_id,
                    error = %error,
                    "Scheduled send failed, occurrence marked failed"
                );
                Ok(())
            }
        }
    }

    /// Compute and enqueue the next occurrence of a recurring schedule.
    async fn enqueue_next_occurrence(&self, job: &ScheduledJob) -> Result<(), StreamError> {
        if job.schedule_type != ScheduleType::Recurring {
            return Ok(());
        }
        let Some(rule) = &job.recurrence else {
            return Ok(());
        };

        let Some(next_time) = recurrence::next_occurrence(job.scheduled_at, rule, &job.timezone)
        else {
            debug!(schedule_id = %job.schedule_id, "Recurrence produced no next occurrence");
            return Ok(());
        };

        if let Some(end_date) = rule.end_date {
            if next_time > end_date {
                info!(
                    schedule_id = %job.schedule_id,
                    end_date = %end_date,
                    "Recurrence reached its end date"
                );
                return Ok(());
            }
        }

        let next_job = job.next_occurrence(next_time);
        let delay = (next_time - Utc::now()).to_std().unwrap_or_default();
        self.queue()
            .enqueue(&EmailJob::Scheduled(next_job), EnqueueOptions::delayed(delay))
            .await?;

        debug!(
            schedule_id = %job.schedule_id,
            next_time = %next_time,
            "Enqueued next occurrence"
        );
        Ok(())
    }
}
