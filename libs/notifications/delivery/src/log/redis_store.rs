//! Redis-backed delivery log store.
//!
//! One hash per log row. The conditional transitions run as server-side
//! Lua scripts so the check-then-act is atomic even with multiple
//! workers racing on the same row.

use super::{
    DeliveryLog, DeliveryLogStore, DeliveryStatus, NewDeliveryLog, StoreError, TransitionOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_KEY_PREFIX: &str = "email:delivery:log";

const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

const SET_SUBJECT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('HSET', KEYS[1], 'subject', ARGV[1])
end
return 1
"#;

// Returns 'ok' when the transition applied, 'missing' for an absent
// row, or the current status when the row is already terminal.
const MARK_SENT_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status ~= 'pending' then
    return status
end
redis.call('HSET', KEYS[1], 'status', 'sent', 'provider_message_id', ARGV[1], 'sent_at', ARGV[2])
return 'ok'
"#;

const MARK_FAILED_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status ~= 'pending' then
    return status
end
redis.call('HSET', KEYS[1], 'status', 'failed', 'error_message', ARGV[1], 'failed_at', ARGV[2])
return 'ok'
"#;

// Returns the incremented retry count, or -1 when the row is missing,
// terminal, or out of retry budget.
const RECORD_ATTEMPT_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status or status ~= 'pending' then
    return -1
end
local count = tonumber(redis.call('HGET', KEYS[1], 'retry_count'))
local max = tonumber(redis.call('HGET', KEYS[1], 'max_retries'))
if count >= max then
    return -1
end
return redis.call('HINCRBY', KEYS[1], 'retry_count', 1)
"#;

/// Redis-backed delivery log store.
pub struct RedisDeliveryLogStore {
    redis: Arc<ConnectionManager>,
    key_prefix: String,
    create: Script,
    set_subject: Script,
    mark_sent: Script,
    mark_failed: Script,
    record_attempt: Script,
}

impl RedisDeliveryLogStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self::with_prefix(Arc::new(redis), DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(redis: Arc<ConnectionManager>, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
            create: Script::new(CREATE_SCRIPT),
            set_subject: Script::new(SET_SUBJECT_SCRIPT),
            mark_sent: Script::new(MARK_SENT_SCRIPT),
            mark_failed: Script::new(MARK_FAILED_SCRIPT),
            record_attempt: Script::new(RECORD_ATTEMPT_SCRIPT),
        }
    }

    fn key(&self, id: Uuid) -> String {
        format!("{}:{}", self.key_prefix, id)
    }

    fn transition_outcome(&self, id: Uuid, reply: &str) -> Result<TransitionOutcome, StoreError> {
        match reply {
            "ok" => Ok(TransitionOutcome::Applied),
            "missing" => Ok(TransitionOutcome::NotFound),
            status => {
                let status = DeliveryStatus::from_str(status).map_err(|_| StoreError::Corrupt {
                    id,
                    message: format!("unknown status '{}'", status),
                })?;
                Ok(TransitionOutcome::AlreadyTerminal(status))
            }
        }
    }

    fn hash_fields(new: &NewDeliveryLog, created_at: DateTime<Utc>) -> Vec<(String, String)> {
        let mut fields = vec![
            ("id".to_string(), new.id.to_string()),
            ("recipient_email".to_string(), new.recipient_email.clone()),
            ("template_used".to_string(), new.template_used.clone()),
            ("status".to_string(), DeliveryStatus::Pending.to_string()),
            ("retry_count".to_string(), "0".to_string()),
            ("max_retries".to_string(), new.max_retries.to_string()),
            ("priority".to_string(), new.priority.to_string()),
            ("created_at".to_string(), created_at.to_rfc3339()),
        ];
        if let Some(user_id) = new.user_id {
            fields.push(("user_id".to_string(), user_id.to_string()));
        }
        if let Some(schedule_id) = new.schedule_id {
            fields.push(("schedule_id".to_string(), schedule_id.to_string()));
        }
        fields
    }

    fn parse_log(id: Uuid, map: HashMap<String, String>) -> Result<DeliveryLog, StoreError> {
        let corrupt = |message: &str| StoreError::Corrupt {
            id,
            message: message.to_string(),
        };

        let required = |field: &str| {
            map.get(field)
                .cloned()
                .ok_or_else(|| corrupt(&format!("missing field '{}'", field)))
        };

        let parse_time = |value: &str, field: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| corrupt(&format!("bad timestamp in '{}'", field)))
        };

        let status = DeliveryStatus::from_str(&required("status")?)
            .map_err(|_| corrupt("unknown status"))?;

        let priority = map
            .get("priority")
            .map(|p| p.parse().map_err(|_| corrupt("unknown priority")))
            .transpose()?
            .unwrap_or_default();

        let parse_uuid = |field: &str| {
            map.get(field)
                .map(|v| Uuid::parse_str(v).map_err(|_| corrupt(&format!("bad uuid in '{}'", field))))
                .transpose()
        };

        Ok(DeliveryLog {
            id,
            user_id: parse_uuid("user_id")?,
            recipient_email: required("recipient_email")?,
            schedule_id: parse_uuid("schedule_id")?,
            template_used: required("template_used")?,
            subject: map.get("subject").cloned(),
            status,
            retry_count: required("retry_count")?
                .parse()
                .map_err(|_| corrupt("bad retry_count"))?,
            max_retries: required("max_retries")?
                .parse()
                .map_err(|_| corrupt("bad max_retries"))?,
            priority,
            provider_message_id: map.get("provider_message_id").cloned(),
            error_message: map.get("error_message").cloned(),
            created_at: parse_time(&required("created_at")?, "created_at")?,
            sent_at: map
                .get("sent_at")
                .map(|t| parse_time(t, "sent_at"))
                .transpose()?,
            failed_at: map
                .get("failed_at")
                .map(|t| parse_time(t, "failed_at"))
                .transpose()?,
        })
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<DeliveryLog>, StoreError> {
        let mut conn = (*self.redis).clone();
        let map: HashMap<String, String> = conn.hgetall(self.key(id)).await?;

        if map.is_empty() {
            return Ok(None);
        }

        Self::parse_log(id, map).map(Some)
    }
}

#[async_trait]
impl DeliveryLogStore for RedisDeliveryLogStore {
    async fn create(&self, new: NewDeliveryLog) -> Result<DeliveryLog, StoreError> {
        let id = new.id;
        let mut conn = (*self.redis).clone();

        let mut invocation = self.create.key(self.key(id));
        for (field, value) in Self::hash_fields(&new, Utc::now()) {
            invocation.arg(field).arg(value);
        }
        let _: i64 = invocation.invoke_async(&mut conn).await?;

        // Re-read so a redelivered entry sees the row the first delivery
        // created, in whatever state it has reached since.
        self.fetch(id).await?.ok_or(StoreError::Corrupt {
            id,
            message: "row vanished after create".to_string(),
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeliveryLog>, StoreError> {
        self.fetch(id).await
    }

    async fn set_subject(&self, id: Uuid, subject: &str) -> Result<(), StoreError> {
        let mut conn = (*self.redis).clone();
        let _: i64 = self
            .set_subject
            .key(self.key(id))
            .arg(subject)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: &str,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut conn = (*self.redis).clone();
        let reply: String = self
            .mark_sent
            .key(self.key(id))
            .arg(provider_message_id)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        self.transition_outcome(id, &reply)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<TransitionOutcome, StoreError> {
        let mut conn = (*self.redis).clone();
        let reply: String = self
            .mark_failed
            .key(self.key(id))
            .arg(error)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        self.transition_outcome(id, &reply)
    }

    async fn record_attempt(&self, id: Uuid) -> Result<Option<DeliveryLog>, StoreError> {
        let mut conn = (*self.redis).clone();
        let incremented: i64 = self
            .record_attempt
            .key(self.key(id))
            .invoke_async(&mut conn)
            .await?;

        if incremented < 0 {
            return Ok(None);
        }

        self.fetch(id).await
    }
}
