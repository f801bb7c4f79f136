//! Task lifecycle integration tests: creation defaults, progress
//! clamping, cancellation rules, retry exhaustion, and sweeping.

use anyhow::anyhow;
use firewatch::kv::{KvStore, MemoryKvStore, keys};
use firewatch::tasks::{
    HandlerRef, TaskManager, TaskPriority, TaskRegistry, TaskRequest, TaskStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn test_registry() -> TaskRegistry {
    TaskRegistry::new()
        .register("ok", |_ctx| async move { Ok(json!("done")) })
        .register("fail", |_ctx| async move { Err(anyhow!("always fails")) })
}

fn test_manager(kv: Arc<MemoryKvStore>) -> Arc<TaskManager> {
    Arc::new(TaskManager::new(
        kv,
        Arc::new(test_registry()),
        CancellationToken::new(),
    ))
}

/// Drain a lane's queue with a single consumer, executing tasks in
/// arrival order until the queue stays empty.
async fn drain_lane(manager: &TaskManager, kv: &MemoryKvStore, priority: TaskPriority) {
    let queue = keys::task_queue_key(priority.lane());
    while let Some(task_id) = kv.dequeue(&queue, Duration::ZERO).await.unwrap() {
        manager.execute(&task_id).await.unwrap();
    }
}

#[tokio::test]
async fn test_created_task_starts_pending_with_zero_retries() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv.clone());

    let task_id = manager
        .create(
            TaskRequest::new("fresh", HandlerRef::named("ok"))
                .priority(TaskPriority::High)
                .max_retries(3),
        )
        .await
        .unwrap();

    // Retrievable before any dispatch loop runs.
    let task = manager.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retries, 0);
    assert_eq!(task.progress, 0.0);
    assert!(task.started_at.is_none());
    assert!(task.error.is_none());

    // The id sits on the high lane's queue.
    assert_eq!(kv.queue_len(&keys::task_queue_key("high")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failing_task_without_retries_ends_failed() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv.clone());

    let task_id = manager
        .create(TaskRequest::new("doomed", HandlerRef::named("fail")).max_retries(0))
        .await
        .unwrap();

    drain_lane(&manager, &kv, TaskPriority::Normal).await;

    let task = manager.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 0);
    assert!(task.error.is_some());
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_always_failing_task_is_reenqueued_exactly_twice() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv.clone());

    let task_id = manager
        .create(TaskRequest::new("retrying", HandlerRef::named("fail")).max_retries(2))
        .await
        .unwrap();

    let queue = keys::task_queue_key("normal");
    let mut executions = 0;
    while let Some(popped) = kv.dequeue(&queue, Duration::ZERO).await.unwrap() {
        assert_eq!(popped, task_id);
        manager.execute(&popped).await.unwrap();
        executions += 1;
    }

    // Initial attempt plus two retries.
    assert_eq!(executions, 3);

    let task = manager.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 2);
}

#[tokio::test]
async fn test_unknown_handler_consumes_retries_like_any_failure() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv.clone());

    let task_id = manager
        .create(TaskRequest::new("ghost", HandlerRef::named("no_such_handler")).max_retries(1))
        .await
        .unwrap();

    drain_lane(&manager, &kv, TaskPriority::Normal).await;

    let task = manager.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 1);
    assert!(task.error.unwrap().contains("Unknown task handler"));
}

#[tokio::test]
async fn test_successful_task_records_result_and_progress() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv.clone());

    let task_id = manager
        .create(TaskRequest::new("winner", HandlerRef::named("ok")))
        .await
        .unwrap();

    drain_lane(&manager, &kv, TaskPriority::Normal).await;

    let task = manager.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 1.0);
    assert!(task.completed_at.is_some());
    assert_eq!(task.result, Some(json!("done")));
    assert_eq!(manager.result(&task_id).await.unwrap(), Some(json!("done")));
}

#[tokio::test]
async fn test_update_progress_clamps_to_unit_interval() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv);

    let task_id = manager
        .create(TaskRequest::new("clamped", HandlerRef::named("ok")))
        .await
        .unwrap();

    assert!(manager.update_progress(&task_id, 1.5).await.unwrap());
    assert_eq!(manager.get(&task_id).await.unwrap().unwrap().progress, 1.0);

    assert!(manager.update_progress(&task_id, -0.3).await.unwrap());
    assert_eq!(manager.get(&task_id).await.unwrap().unwrap().progress, 0.0);

    assert!(manager.update_progress(&task_id, 0.42).await.unwrap());
    assert_eq!(manager.get(&task_id).await.unwrap().unwrap().progress, 0.42);

    assert!(!manager.update_progress("01MISSING", 0.5).await.unwrap());
}

#[tokio::test]
async fn test_cancel_only_from_pending_or_running() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv.clone());

    // Pending task: cancel succeeds once.
    let pending = manager
        .create(TaskRequest::new("pending", HandlerRef::named("ok")))
        .await
        .unwrap();
    assert!(manager.cancel(&pending).await.unwrap());
    assert_eq!(
        manager.get(&pending).await.unwrap().unwrap().status,
        TaskStatus::Canceled
    );
    // Already canceled: refused.
    assert!(!manager.cancel(&pending).await.unwrap());

    // Completed task: refused.
    let completed = manager
        .create(TaskRequest::new("done", HandlerRef::named("ok")))
        .await
        .unwrap();
    drain_lane(&manager, &kv, TaskPriority::Normal).await;
    assert!(!manager.cancel(&completed).await.unwrap());

    // Failed task: refused.
    let failed = manager
        .create(TaskRequest::new("failed", HandlerRef::named("fail")))
        .await
        .unwrap();
    drain_lane(&manager, &kv, TaskPriority::Normal).await;
    assert!(!manager.cancel(&failed).await.unwrap());

    // Unknown task: refused.
    assert!(!manager.cancel("01MISSING").await.unwrap());
}

#[tokio::test]
async fn test_sweep_respects_age_threshold() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv.clone());

    let finished = manager
        .create(TaskRequest::new("old", HandlerRef::named("ok")))
        .await
        .unwrap();
    let still_pending = manager
        .create(TaskRequest::new("young", HandlerRef::named("ok")))
        .await
        .unwrap();

    // Complete only the first task.
    let queue = keys::task_queue_key("normal");
    let first = kv.dequeue(&queue, Duration::ZERO).await.unwrap().unwrap();
    manager.execute(&first).await.unwrap();

    // A very large age removes nothing.
    assert_eq!(
        manager.sweep(Duration::from_secs(u64::MAX / 4)).await.unwrap(),
        0
    );
    assert!(manager.get(&finished).await.unwrap().is_some());

    // Age zero removes every terminal task immediately, record and
    // result both.
    assert_eq!(manager.sweep(Duration::ZERO).await.unwrap(), 1);
    assert!(manager.get(&finished).await.unwrap().is_none());
    assert!(!kv.exists(&keys::task_result_key(&finished)).await.unwrap());

    // The pending task survives.
    assert!(manager.get(&still_pending).await.unwrap().is_some());
}

#[tokio::test]
async fn test_list_snapshot_with_status_filter() {
    let kv = Arc::new(MemoryKvStore::new());
    let manager = test_manager(kv.clone());

    manager
        .create(TaskRequest::new("a", HandlerRef::named("ok")))
        .await
        .unwrap();
    manager
        .create(TaskRequest::new("b", HandlerRef::named("fail")))
        .await
        .unwrap();

    drain_lane(&manager, &kv, TaskPriority::Normal).await;

    assert_eq!(manager.list(None).await.len(), 2);
    assert_eq!(manager.list(Some(TaskStatus::Completed)).await.len(), 1);
    assert_eq!(manager.list(Some(TaskStatus::Failed)).await.len(), 1);
    assert_eq!(manager.list(Some(TaskStatus::Pending)).await.len(), 0);
}
