//! Per-lane task dispatch loops.
//!
//! One consumer loop runs per priority lane. Each loop pops the head of
//! its lane's durable queue with a short blocking timeout, resolves the
//! task, skips ids that are missing or no longer pending, and hands off
//! execution without waiting for completion. Per-lane fan-out is bounded
//! by a semaphore: once a lane is saturated the loop stalls on permit
//! acquisition, which doubles as backpressure on the queue.
//!
//! Within a lane, items start in arrival order (FIFO per the queue's
//! list semantics); no ordering holds across lanes.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use super::manager::TaskManager;
use super::spawn::spawn_cancellable_task;
use super::task::{TaskPriority, TaskStatus};
use crate::kv::{KvStore, keys};

/// Dispatch loop tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum concurrently executing tasks per lane.
    pub lane_concurrency: usize,
    /// Blocking dequeue timeout.
    pub dequeue_timeout: Duration,
    /// Idle pause after an empty dequeue or a queue error.
    pub idle_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lane_concurrency: 4,
            dequeue_timeout: Duration::from_secs(1),
            idle_interval: Duration::from_millis(250),
        }
    }
}

/// Spawns and runs the three lane consumer loops.
pub struct TaskDispatcher {
    manager: Arc<TaskManager>,
    kv: Arc<dyn KvStore>,
    config: DispatcherConfig,
}

impl TaskDispatcher {
    pub fn new(manager: Arc<TaskManager>, kv: Arc<dyn KvStore>, config: DispatcherConfig) -> Self {
        Self {
            manager,
            kv,
            config,
        }
    }

    /// Spawn one cancellable consumer loop per priority lane onto the
    /// tracker.
    pub fn spawn_lanes(&self, tracker: &TaskTracker, cancel: CancellationToken) {
        for priority in TaskPriority::all() {
            let manager = self.manager.clone();
            let kv = self.kv.clone();
            let config = self.config.clone();

            spawn_cancellable_task(tracker, cancel.clone(), move |token| {
                run_lane(manager, kv, priority, config, token)
            });
        }
    }
}

/// Run a single lane's consumer loop until cancelled.
pub async fn run_lane(
    manager: Arc<TaskManager>,
    kv: Arc<dyn KvStore>,
    priority: TaskPriority,
    config: DispatcherConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let lane = priority.lane();
    let queue = keys::task_queue_key(lane);
    let semaphore = Arc::new(Semaphore::new(config.lane_concurrency));
    let executions = TaskTracker::new();

    info!(
        lane = %lane,
        concurrency = config.lane_concurrency,
        "Starting lane consumer"
    );

    while !cancel.is_cancelled() {
        let popped = tokio::select! {
            () = cancel.cancelled() => break,
            popped = kv.dequeue(&queue, config.dequeue_timeout) => popped,
        };

        let task_id = match popped {
            Ok(Some(task_id)) => task_id,
            Ok(None) => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(config.idle_interval) => continue,
                }
            }
            Err(e) => {
                warn!(lane = %lane, error = ?e, "Dequeue failed");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(config.idle_interval) => continue,
                }
            }
        };

        match manager.get(&task_id).await {
            Ok(Some(task)) if task.status == TaskStatus::Pending => {}
            Ok(Some(task)) => {
                debug!(lane = %lane, task = %task_id, status = %task.status, "Skipping non-pending task");
                continue;
            }
            Ok(None) => {
                warn!(lane = %lane, task = %task_id, "Dequeued id with no task record");
                continue;
            }
            Err(e) => {
                error!(lane = %lane, task = %task_id, error = ?e, "Task lookup failed");
                continue;
            }
        }

        // Bound lane fan-out: wait for a free execution slot before
        // handing off. Execution itself is fire-and-forget.
        let permit = tokio::select! {
            () = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let manager = manager.clone();
        executions.spawn(async move {
            let _permit = permit;
            if let Err(e) = manager.execute(&task_id).await {
                error!(task = %task_id, error = ?e, "Task execution errored");
            }
        });
    }

    executions.close();
    executions.wait().await;
    info!(lane = %lane, "Lane consumer stopped");
    Ok(())
}
