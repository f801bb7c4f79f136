//! In-memory key-value store for tests and single-process deployments.
//!
//! Mirrors the Redis adapter's semantics without persistence: data is
//! lost on restart and there is no cross-process visibility. The
//! blocking dequeue is implemented with a `Notify` so a consumer wakes
//! promptly when a producer enqueues.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};

use super::{KvStore, decode_value};

/// In-memory implementation of [`KvStore`].
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    queue_notify: Notify,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a pub/sub channel. Only messages published after the
    /// subscription is created are received.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Value> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned().map(decode_value))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), encoded);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &Value, _ttl_seconds: u64) -> Result<()> {
        // TTL is not enforced in memory; entries live until deleted.
        self.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        Ok(entries.contains_key(key))
    }

    async fn publish(&self, channel: &str, value: &Value) -> Result<usize> {
        let channels = self.channels.lock().await;
        match channels.get(channel) {
            Some(sender) => Ok(sender.send(value.clone()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn enqueue(&self, queue: &str, item: &str) -> Result<()> {
        {
            let mut queues = self.queues.lock().await;
            queues
                .entry(queue.to_string())
                .or_default()
                .push_back(item.to_string());
        }
        self.queue_notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut queues = self.queues.lock().await;
                if let Some(items) = queues.get_mut(queue) {
                    if let Some(item) = items.pop_front() {
                        return Ok(Some(item));
                    }
                }
            }

            if tokio::time::timeout_at(deadline, self.queue_notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<usize> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map(VecDeque::len).unwrap_or(0))
    }
}
