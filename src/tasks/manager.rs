//! Task manager: creation, lookup, cancellation, progress, sweeping,
//! and execution of background tasks.
//!
//! The manager is an explicitly constructed service passed to
//! collaborators as `Arc<TaskManager>`; there is no global instance.
//! Task records are persisted as JSON in the key-value store and
//! mirrored in an in-process read-through cache: lookups check the cache
//! first, fall back to the durable store, and backfill on hit. The cache
//! has no invalidation beyond process restart.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{TaskContext, TaskRegistry};
use super::task::{Task, TaskRequest, TaskStatus};
use crate::errors::TaskError;
use crate::kv::{KvStore, keys};

pub struct TaskManager {
    kv: Arc<dyn KvStore>,
    registry: Arc<TaskRegistry>,
    cache: RwLock<HashMap<String, Task>>,
    /// Parent token for handler contexts; cancelling it asks all
    /// cooperative handlers to wind down.
    cancel: CancellationToken,
}

impl TaskManager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        registry: Arc<TaskRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kv,
            registry,
            cache: RwLock::new(HashMap::new()),
            cancel,
        }
    }

    /// Create a task: persist a pending record and append its id to the
    /// tail of the priority lane's queue.
    pub async fn create(&self, request: TaskRequest) -> Result<String> {
        let task = Task::from_request(request);
        let task_id = task.id.clone();
        let lane = task.priority.lane();

        self.persist(&task).await?;
        self.kv
            .enqueue(&keys::task_queue_key(lane), &task_id)
            .await?;

        info!(
            task = %task_id,
            name = %task.name,
            handler = %task.handler,
            lane = %lane,
            "Created task"
        );

        Ok(task_id)
    }

    /// Fetch a task through the read-through cache.
    pub async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        {
            let cache = self.cache.read().await;
            if let Some(task) = cache.get(task_id) {
                return Ok(Some(task.clone()));
            }
        }

        let stored = self.kv.get(&keys::task_key(task_id)).await?;
        let value = match stored {
            Some(value) => value,
            None => return Ok(None),
        };

        let task: Task =
            serde_json::from_value(value).map_err(|e| TaskError::RecordDecodingFailed {
                task_id: task_id.to_string(),
                source: e,
            })?;

        let mut cache = self.cache.write().await;
        cache.insert(task.id.clone(), task.clone());
        Ok(Some(task))
    }

    /// Cancel a task. Returns true only when the task was pending or
    /// running. Cancellation is advisory: an in-flight execution is not
    /// interrupted, though cooperative handlers may observe the token.
    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        let mut task = match self.get(task_id).await? {
            Some(task) => task,
            None => return Ok(false),
        };

        match task.status {
            TaskStatus::Pending | TaskStatus::Running => {
                task.status = TaskStatus::Canceled;
                task.completed_at = Some(Utc::now());
                self.persist(&task).await?;
                info!(task = %task_id, "Canceled task");
                Ok(true)
            }
            _ => {
                debug!(task = %task_id, status = %task.status, "Cancel refused for terminal task");
                Ok(false)
            }
        }
    }

    /// Record handler-reported progress, clamped to [0, 1]. Has no
    /// effect on scheduling.
    pub async fn update_progress(&self, task_id: &str, progress: f64) -> Result<bool> {
        let mut task = match self.get(task_id).await? {
            Some(task) => task,
            None => return Ok(false),
        };

        task.progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        self.persist(&task).await?;
        Ok(true)
    }

    /// Snapshot of the in-process cache, optionally filtered by status.
    pub async fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let cache = self.cache.read().await;
        cache
            .values()
            .filter(|task| status.map(|s| task.status == s).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Remove terminal tasks whose completion timestamp is older than
    /// `max_age`, deleting both the record and any separately stored
    /// result. Returns the number of tasks removed.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize> {
        let max_age = match ChronoDuration::from_std(max_age) {
            Ok(age) => age,
            // Age exceeds the representable range: nothing is old enough.
            Err(_) => return Ok(0),
        };
        let cutoff = match Utc::now().checked_sub_signed(max_age) {
            Some(cutoff) => cutoff,
            None => return Ok(0),
        };

        let stale: Vec<String> = {
            let cache = self.cache.read().await;
            cache
                .values()
                .filter(|task| {
                    task.is_terminal()
                        && task
                            .completed_at
                            .map(|completed| completed <= cutoff)
                            .unwrap_or(false)
                })
                .map(|task| task.id.clone())
                .collect()
        };

        let mut removed = 0;
        for task_id in stale {
            self.kv.delete(&keys::task_key(&task_id)).await?;
            self.kv.delete(&keys::task_result_key(&task_id)).await?;

            let mut cache = self.cache.write().await;
            cache.remove(&task_id);
            removed += 1;
        }

        if removed > 0 {
            info!(count = removed, "Swept terminal tasks");
        }
        Ok(removed)
    }

    /// Execute a task to completion.
    ///
    /// Marks the task running, resolves its handler through the registry
    /// (resolution failure is treated identically to a handler error:
    /// both consume a retry attempt), and records the outcome. On
    /// failure with retries remaining, the retry counter is incremented,
    /// status resets to pending, and the id is re-appended to its
    /// original lane.
    pub async fn execute(&self, task_id: &str) -> Result<()> {
        let mut task = match self.get(task_id).await? {
            Some(task) => task,
            None => {
                warn!(task = %task_id, "Dequeued unknown task id");
                return Ok(());
            }
        };

        if task.status != TaskStatus::Pending {
            debug!(task = %task_id, status = %task.status, "Skipping non-pending task");
            return Ok(());
        }

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        self.persist(&task).await?;

        let ctx = TaskContext {
            task_id: task.id.clone(),
            args: task.args.clone(),
            kwargs: task.kwargs.clone(),
            cancel: self.cancel.child_token(),
        };

        let outcome = self.registry.invoke(&task.handler.key(), ctx).await;

        match outcome {
            Ok(result) => {
                self.kv
                    .set(&keys::task_result_key(&task.id), &result)
                    .await?;

                task.result = Some(result);
                task.status = TaskStatus::Completed;
                task.progress = 1.0;
                task.completed_at = Some(Utc::now());
                self.persist(&task).await?;

                info!(task = %task.id, name = %task.name, "Task completed");
            }
            Err(e) => {
                task.error = Some(e.to_string());
                task.completed_at = Some(Utc::now());

                if task.retries < task.max_retries {
                    task.retries += 1;
                    task.status = TaskStatus::Pending;
                    self.persist(&task).await?;
                    self.kv
                        .enqueue(&keys::task_queue_key(task.priority.lane()), &task.id)
                        .await?;

                    warn!(
                        task = %task.id,
                        attempt = task.retries,
                        max_retries = task.max_retries,
                        error = %e,
                        "Task failed, re-enqueued for retry"
                    );
                } else {
                    task.status = TaskStatus::Failed;
                    self.persist(&task).await?;

                    error!(
                        task = %task.id,
                        retries = task.retries,
                        error = %e,
                        "Task failed terminally"
                    );
                }
            }
        }

        Ok(())
    }

    /// Fetch a stored task result.
    pub async fn result(&self, task_id: &str) -> Result<Option<Value>> {
        self.kv.get(&keys::task_result_key(task_id)).await
    }

    async fn persist(&self, task: &Task) -> Result<()> {
        let value = serde_json::to_value(task)?;
        self.kv.set(&keys::task_key(&task.id), &value).await?;

        let mut cache = self.cache.write().await;
        cache.insert(task.id.clone(), task.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::tasks::task::HandlerRef;
    use serde_json::json;

    fn manager_with(kv: Arc<MemoryKvStore>) -> TaskManager {
        let registry =
            Arc::new(TaskRegistry::new().register("noop", |_ctx| async move { Ok(json!(null)) }));
        TaskManager::new(kv, registry, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_read_through_cache_backfill() {
        let kv = Arc::new(MemoryKvStore::new());

        // Create through one manager, read through another sharing only
        // the durable store.
        let writer = manager_with(kv.clone());
        let task_id = writer
            .create(TaskRequest::new("cached", HandlerRef::named("noop")))
            .await
            .unwrap();

        let reader = manager_with(kv.clone());
        let task = reader.get(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        // Backfilled: the cache now answers even after the durable
        // record disappears.
        kv.delete(&keys::task_key(&task_id)).await.unwrap();
        assert!(reader.get(&task_id).await.unwrap().is_some());

        // A fresh manager with a cold cache no longer finds it.
        let cold = manager_with(kv.clone());
        assert!(cold.get(&task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_unknown_task() {
        let kv = Arc::new(MemoryKvStore::new());
        let manager = manager_with(kv);
        assert!(manager.get("01NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_result_stored_separately() {
        let kv = Arc::new(MemoryKvStore::new());
        let registry = Arc::new(
            TaskRegistry::new().register("answer", |_ctx| async move { Ok(json!(42)) }),
        );
        let manager = TaskManager::new(kv.clone(), registry, CancellationToken::new());

        let task_id = manager
            .create(TaskRequest::new("answer", HandlerRef::named("answer")))
            .await
            .unwrap();
        manager.execute(&task_id).await.unwrap();

        assert_eq!(manager.result(&task_id).await.unwrap(), Some(json!(42)));
        assert!(
            kv.exists(&keys::task_result_key(&task_id)).await.unwrap(),
            "result lives under its own key"
        );
    }
}
