use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const RESOLVE_USER: &str = "resolve-user";
pub const LOAD_USER_AND_PREFERENCES: &str = "load-user-and-preferences";
pub const FETCH_NEWS: &str = "fetch-news";
pub const SUMMARIZE_NEWS: &str = "summarize-news";
pub const RENDER: &str = "render";
pub const CREATE_ISSUE: &str = "create-issue";
pub const SEND_EMAIL: &str = "send-email";
pub const RECORD_DELIVERY: &str = "record-delivery";
pub const ADVANCE_SCHEDULE: &str = "advance-schedule";

pub fn step_key(execution_id: Uuid, step: &str) -> String {
    format!("newsletter:execution:{}:step:{}", execution_id, step)
}

/// Durable memo of completed step results, keyed by [`step_key`].
#[async_trait]
pub trait StepCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StepCacheError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), StepCacheError>;

    /// Drops a step result so the next run of the step executes it again.
    async fn forget(&self, key: &str) -> Result<(), StepCacheError>;
}

#[derive(thiserror::Error)]
pub enum StepCacheError {
    #[error("Failed to access the step cache in Redis.")]
    Redis(#[from] redis::RedisError),
}

impl std::fmt::Debug for StepCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

pub struct RedisStepCache {
    redis_client: redis::Client,
    ttl: Duration,
}

impl RedisStepCache {
    pub fn new(redis_client: redis::Client, ttl: Duration) -> Self {
        Self { redis_client, ttl }
    }
}

#[async_trait]
impl StepCache for RedisStepCache {
    #[tracing::instrument(name = "Read a step result from Redis", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Value>, StepCacheError> {
        let mut redis_conn = self.redis_client.get_tokio_connection().await?;

        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut redis_conn)
            .await?;

        Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("Ignoring unreadable step result: {}", err);
                None
            }
        }))
    }

    #[tracing::instrument(name = "Store a step result in Redis", skip(self, value))]
    async fn put(&self, key: &str, value: Value) -> Result<(), StepCacheError> {
        let mut redis_conn = self.redis_client.get_tokio_connection().await?;

        redis::cmd("SET")
            .arg(key)
            .arg(value.to_string())
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut redis_conn)
            .await?;

        Ok(())
    }

    #[tracing::instrument(name = "Drop a step result from Redis", skip(self))]
    async fn forget(&self, key: &str) -> Result<(), StepCacheError> {
        let mut redis_conn = self.redis_client.get_tokio_connection().await?;

        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut redis_conn)
            .await?;

        Ok(())
    }
}

/// Step cache living in process memory; entries never expire.
#[derive(Default)]
pub struct InMemoryStepCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl InMemoryStepCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_raw(&self, key: &str, value: Value) {
        self.entries.lock().await.insert(key.to_string(), value);
    }
}

#[async_trait]
impl StepCache for InMemoryStepCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, StepCacheError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StepCacheError> {
        self.entries.lock().await.insert(key.to_string(), value);

        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), StepCacheError> {
        self.entries.lock().await.remove(key);

        Ok(())
    }
}
