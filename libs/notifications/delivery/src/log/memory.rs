//! In-memory delivery log store.
//!
//! Backs unit and integration tests. The mutex is held across each
//! whole check-then-act, giving the same atomicity the Redis store gets
//! from server-side scripts.

use super::{
    DeliveryLog, DeliveryLogStore, DeliveryStatus, NewDeliveryLog, StoreError, TransitionOutcome,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory delivery log store.
#[derive(Clone, Default)]
pub struct InMemoryDeliveryLogStore {
    logs: Arc<Mutex<HashMap<Uuid, DeliveryLog>>>,
}

impl InMemoryDeliveryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows (for tests).
    pub async fn len(&self) -> usize {
        self.logs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.logs.lock().await.is_empty()
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryDeliveryLogStore {
    async fn create(&self, new: NewDeliveryLog) -> Result<DeliveryLog, StoreError> {
        let mut logs = self.logs.lock().await;
        let log = logs
            .entry(new.id)
            .or_insert_with(|| new.into_log(Utc::now()));
        Ok(log.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeliveryLog>, StoreError> {
        Ok(self.logs.lock().await.get(&id).cloned())
    }

    async fn set_subject(&self, id: Uuid, subject: &str) -> Result<(), StoreError> {
        if let Some(log) = self.logs.lock().await.get_mut(&id) {
            log.subject = Some(subject.to_string());
        }
        Ok(())
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: &str,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut logs = self.logs.lock().await;
        let Some(log) = logs.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };

        if log.status.is_terminal() {
            return Ok(TransitionOutcome::AlreadyTerminal(log.status));
        }

        log.status = DeliveryStatus::Sent;
        log.provider_message_id = Some(provider_message_id.to_string());
        log.sent_at = Some(Utc::now());
        Ok(TransitionOutcome::Applied)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<TransitionOutcome, StoreError> {
        let mut logs = self.logs.lock().await;
        let Some(log) = logs.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };

        if log.status.is_terminal() {
            return Ok(TransitionOutcome::AlreadyTerminal(log.status));
        }

        log.status = DeliveryStatus::Failed;
        log.error_message = Some(error.to_string());
        log.failed_at = Some(Utc::now());
        Ok(TransitionOutcome::Applied)
    }

    async fn record_attempt(&self, id: Uuid) -> Result<Option<DeliveryLog>, StoreError> {
        let mut logs = self.logs.lock().await;
        let Some(log) = logs.get_mut(&id) else {
            return Ok(None);
        };

        if log.status.is_terminal() || log.retry_count >= log.max_retries {
            return Ok(None);
        }

        log.retry_count += 1;
        Ok(Some(log.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EmailContent, ImmediateJob};

    fn new_log() -> NewDeliveryLog {
        let job = ImmediateJob::new("user@example.com", EmailContent::template("welcome"));
        NewDeliveryLog::from_immediate(&job)
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_id() {
        let store = InMemoryDeliveryLogStore::new();
        let new = new_log();

        let first = store.create(new.clone()).await.unwrap();
        store.mark_sent(first.id, "msg-1").await.unwrap();

        // Redelivered entry re-creates with the same id and sees the
        // settled row, not a fresh pending one
        let again = store.create(new).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, DeliveryStatus::Sent);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_sent_is_terminal() {
        let store = InMemoryDeliveryLogStore::new();
        let log = store.create(new_log()).await.unwrap();

        assert_eq!(
            store.mark_sent(log.id, "msg-1").await.unwrap(),
            TransitionOutcome::Applied
        );
        assert_eq!(
            store.mark_sent(log.id, "msg-2").await.unwrap(),
            TransitionOutcome::AlreadyTerminal(DeliveryStatus::Sent)
        );
        assert_eq!(
            store.mark_failed(log.id, "boom").await.unwrap(),
            TransitionOutcome::AlreadyTerminal(DeliveryStatus::Sent)
        );

        let log = store.get(log.id).await.unwrap().unwrap();
        assert_eq!(log.status, DeliveryStatus::Sent);
        assert_eq!(log.provider_message_id.as_deref(), Some("msg-1"));
        assert!(log.error_message.is_none());
    }

    #[tokio::test]
    async fn test_failed_is_terminal() {
        let store = InMemoryDeliveryLogStore::new();
        let log = store.create(new_log()).await.unwrap();

        store.mark_failed(log.id, "timeout").await.unwrap();
        assert_eq!(
            store.mark_failed(log.id, "again").await.unwrap(),
            TransitionOutcome::AlreadyTerminal(DeliveryStatus::Failed)
        );

        let log = store.get(log.id).await.unwrap().unwrap();
        assert_eq!(log.error_message.as_deref(), Some("timeout"));
        assert!(log.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_record_attempt_respects_budget() {
        let store = InMemoryDeliveryLogStore::new();
        let mut new = new_log();
        new.max_retries = 2;
        let log = store.create(new).await.unwrap();

        assert_eq!(
            store.record_attempt(log.id).await.unwrap().unwrap().retry_count,
            1
        );
        assert_eq!(
            store.record_attempt(log.id).await.unwrap().unwrap().retry_count,
            2
        );
        // Budget exhausted
        assert!(store.record_attempt(log.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_attempt_noops_on_terminal() {
        let store = InMemoryDeliveryLogStore::new();
        let log = store.create(new_log()).await.unwrap();
        store.mark_sent(log.id, "msg-1").await.unwrap();

        assert!(store.record_attempt(log.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = InMemoryDeliveryLogStore::new();
        let id = Uuid::new_v4();

        assert!(store.get(id).await.unwrap().is_none());
        assert_eq!(
            store.mark_sent(id, "msg").await.unwrap(),
            TransitionOutcome::NotFound
        );
        assert!(store.record_attempt(id).await.unwrap().is_none());
    }
}
