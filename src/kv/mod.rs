//! Key-value store abstraction for caching, queueing, and pub/sub.
//!
//! This module provides a trait-based abstraction over the external
//! key-value store so that the Redis-backed production implementation and
//! the in-memory implementation used by tests and single-process
//! deployments can be used interchangeably.
//!
//! # Value coding
//!
//! Structured values are serialized to JSON text on write. Reads attempt
//! to parse the stored text as JSON and fall back to a raw string value
//! when parsing fails, so keys written by other processes remain
//! readable.
//!
//! # Queues
//!
//! `enqueue`/`dequeue` map directly onto the store's list primitives
//! (tail push, blocking head pop). Ordering and durability are delegated
//! entirely to the underlying store: within one queue, items come out in
//! the order they went in.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

mod memory;
mod redis;

pub use memory::MemoryKvStore;
pub use redis::{RedisKvStore, create_redis_pool};

/// Uniform surface over the external key-value store.
///
/// Implementations must be thread-safe (`Send + Sync`); all methods take
/// `&self` and may be called concurrently from multiple tasks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. Returns `Ok(None)` when the key does not exist,
    /// so callers can distinguish absence from a failed operation.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value, overwriting any existing value.
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Store a value with a time-to-live in seconds.
    async fn set_ex(&self, key: &str, value: &Value, ttl_seconds: u64) -> Result<()>;

    /// Delete a key. Returns whether a key was actually removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check key existence without fetching the value.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Publish a value on a channel. Returns the number of receivers.
    async fn publish(&self, channel: &str, value: &Value) -> Result<usize>;

    /// Append an item to the tail of a queue.
    async fn enqueue(&self, queue: &str, item: &str) -> Result<()>;

    /// Pop the head of a queue, blocking up to `timeout` when the queue
    /// is empty. A zero timeout polls without blocking.
    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    /// Current queue depth.
    async fn queue_len(&self, queue: &str) -> Result<usize>;

    /// Check if the store is reachable and operational.
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Key namespace used by the task subsystem and firewall.
pub mod keys {
    /// Prefix for serialized task records.
    pub const TASK_PREFIX: &str = "task";

    /// Prefix for separately stored task results.
    pub const TASK_RESULT_PREFIX: &str = "task_result";

    /// Prefix for per-lane task queues.
    pub const TASK_QUEUE_PREFIX: &str = "task_queue";

    /// Pub/sub channel for firewall security events.
    pub const FIREWALL_EVENTS_CHANNEL: &str = "firewall:events";

    /// Build the record key for a task id.
    pub fn task_key(task_id: &str) -> String {
        format!("{}:{}", TASK_PREFIX, task_id)
    }

    /// Build the result key for a task id.
    pub fn task_result_key(task_id: &str) -> String {
        format!("{}:{}", TASK_RESULT_PREFIX, task_id)
    }

    /// Build the queue key for a priority lane.
    pub fn task_queue_key(lane: &str) -> String {
        format!("{}:{}", TASK_QUEUE_PREFIX, lane)
    }
}

/// Decode stored text into a value, falling back to a raw string when the
/// text is not valid JSON.
pub(crate) fn decode_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}
