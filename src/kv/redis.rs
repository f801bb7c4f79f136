//! Redis-backed key-value store implementation.
//!
//! Wraps a `deadpool-redis` connection pool. Reconnection is best-effort
//! and delegated to the pool: each operation checks out a fresh
//! connection, so a dropped connection only fails the operation in
//! flight. Queue operations map onto RPUSH/BLPOP, giving FIFO ordering
//! per queue with durability delegated to Redis.

use anyhow::Result;
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime, redis::AsyncCommands};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, trace};

use super::{KvStore, decode_value};
use crate::errors::KvError;

/// Create a Redis connection pool from a Redis URL.
pub fn create_redis_pool(redis_url: &str) -> Result<Pool> {
    let cfg = Config::from_url(redis_url);
    cfg.create_pool(Some(Runtime::Tokio1)).map_err(|err| {
        KvError::ConnectionFailed {
            details: format!("Failed to create Redis pool: {}", err),
        }
        .into()
    })
}

/// Redis-backed implementation of [`KvStore`].
#[derive(Clone)]
pub struct RedisKvStore {
    pool: Pool,
}

impl RedisKvStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| {
                KvError::ConnectionFailed {
                    details: e.to_string(),
                }
                .into()
            })
    }

    fn encode(key: &str, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(|e| {
            KvError::ValueEncodingFailed {
                key: key.to_string(),
                source: e,
            }
            .into()
        })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.connection().await?;

        let raw: Option<String> =
            conn.get(key)
                .await
                .map_err(|e| KvError::RedisOperationFailed {
                    operation: "get".to_string(),
                    source: e,
                })?;

        Ok(raw.map(decode_value))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let mut conn = self.connection().await?;
        let encoded = Self::encode(key, value)?;

        conn.set::<_, _, ()>(key, encoded)
            .await
            .map_err(|e| KvError::RedisOperationFailed {
                operation: "set".to_string(),
                source: e,
            })?;

        trace!(key = %key, "Stored value in Redis");
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &Value, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let encoded = Self::encode(key, value)?;

        conn.set_ex::<_, _, ()>(key, encoded, ttl_seconds)
            .await
            .map_err(|e| KvError::RedisOperationFailed {
                operation: "set_ex".to_string(),
                source: e,
            })?;

        trace!(key = %key, ttl = ttl_seconds, "Stored value in Redis with TTL");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| KvError::RedisOperationFailed {
                operation: "del".to_string(),
                source: e,
            })?;

        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| KvError::RedisOperationFailed {
                operation: "exists".to_string(),
                source: e,
            })?;

        Ok(exists)
    }

    async fn publish(&self, channel: &str, value: &Value) -> Result<usize> {
        let mut conn = self.connection().await?;
        let encoded = Self::encode(channel, value)?;

        let receivers: i64 = conn.publish(channel, encoded).await.map_err(|e| {
            KvError::RedisOperationFailed {
                operation: "publish".to_string(),
                source: e,
            }
        })?;

        Ok(receivers.max(0) as usize)
    }

    async fn enqueue(&self, queue: &str, item: &str) -> Result<()> {
        let mut conn = self.connection().await?;

        conn.rpush::<_, _, ()>(queue, item)
            .await
            .map_err(|e| KvError::RedisOperationFailed {
                operation: "rpush".to_string(),
                source: e,
            })?;

        trace!(queue = %queue, "Enqueued item");
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.connection().await?;

        // BLPOP with timeout 0 blocks forever; map a zero timeout to a
        // non-blocking LPOP instead.
        if timeout.is_zero() {
            let item: Option<String> =
                conn.lpop(queue, None)
                    .await
                    .map_err(|e| KvError::RedisOperationFailed {
                        operation: "lpop".to_string(),
                        source: e,
                    })?;
            return Ok(item);
        }

        let popped: Option<(String, String)> = conn
            .blpop(queue, timeout.as_secs_f64())
            .await
            .map_err(|e| KvError::RedisOperationFailed {
                operation: "blpop".to_string(),
                source: e,
            })?;

        Ok(popped.map(|(_, item)| item))
    }

    async fn queue_len(&self, queue: &str) -> Result<usize> {
        let mut conn = self.connection().await?;

        let depth: usize = conn
            .llen(queue)
            .await
            .map_err(|e| KvError::RedisOperationFailed {
                operation: "llen".to_string(),
                source: e,
            })?;

        Ok(depth)
    }

    async fn is_healthy(&self) -> bool {
        match self.pool.get().await {
            Ok(mut conn) => {
                match deadpool_redis::redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                {
                    Ok(response) => response == "PONG",
                    Err(e) => {
                        error!(error = ?e, "Redis health check failed");
                        false
                    }
                }
            }
            Err(e) => {
                error!(error = ?e, "Failed to get Redis connection for health check");
                false
            }
        }
    }
}
